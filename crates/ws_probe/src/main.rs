use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use std::io::IsTerminal;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Parser)]
#[command(
    name = "ws_probe",
    version,
    about = "Connect to a skywave WebSocket channel and print a short message summary."
)]
struct Args {
    /// WebSocket URL (example: ws://127.0.0.1:9010/events, /signal,
    /// /scanner-audio)
    url: String,

    /// Number of messages to print before exiting
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Per-message read timeout (milliseconds)
    #[arg(long, default_value_t = 4000)]
    timeout_ms: u64,
}

/// Spectrum batches lead with a little-endian frame count; everything
/// else binary is audio or tagged receiver frames.
fn describe_binary(bytes: &[u8]) -> String {
    if bytes.len() >= 4 {
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if count > 0 && count < 1024 && (bytes.len() - 4) % (count as usize) == 0 {
            return format!("batch count={count}");
        }
    }
    if bytes.first() == Some(&b'A') {
        let id_len = bytes.get(1).copied().unwrap_or(0) as usize;
        if let Some(id) = bytes
            .get(2..2 + id_len)
            .and_then(|b| std::str::from_utf8(b).ok())
        {
            return format!("audio id={id}");
        }
    }
    "raw".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| anyhow::anyhow!("init tracing: {e}"))?;

    let args = Args::parse();
    let (mut ws, _) = tokio_tungstenite::connect_async(args.url.as_str())
        .await
        .context("connect")?;

    for idx in 0..args.count {
        let msg = tokio::time::timeout(Duration::from_millis(args.timeout_ms), ws.next())
            .await
            .context("timeout")?
            .context("websocket ended")?
            .context("read message")?;

        match msg {
            Message::Text(s) => {
                let kind = serde_json::from_str::<serde_json::Value>(&s)
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
                    .unwrap_or_else(|| "json".to_string());
                tracing::info!(idx, bytes = s.len(), kind = %kind, "text");
            }
            Message::Binary(b) => {
                tracing::info!(idx, bytes = b.len(), shape = %describe_binary(&b), "binary");
            }
            Message::Ping(b) => {
                tracing::info!(idx, bytes = b.len(), "ping");
            }
            Message::Pong(b) => {
                tracing::info!(idx, bytes = b.len(), "pong");
            }
            Message::Close(frame) => {
                tracing::info!(idx, frame = ?frame, "close");
                break;
            }
            Message::Frame(_) => {}
        }
    }

    Ok(())
}
