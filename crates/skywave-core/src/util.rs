use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// 32 hex chars of randomness, enough to never collide within one
/// deployment's recordings or client ids.
pub fn generate_unique_id() -> String {
    let id: u128 = rand::thread_rng().gen();
    hex::encode(id.to_be_bytes())
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_are_32_hex_chars() {
        let a = generate_unique_id();
        let b = generate_unique_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
