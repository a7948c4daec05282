use crate::scanner::detect::round_to_khz;
use rusqlite::{params, Connection, OptionalExtension};
use skywave_core::protocol::{
    ChannelMode, ChannelPatch, ChannelSpec, HitRecord, LockoutEntry, ScannerChannel,
};
use skywave_core::util::now_ms;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Hits kept after pruning.
const HIT_KEEP: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no such row")]
    NotFound,
}

/// Durable scanner state: priority channels, lockouts, and the hit log.
/// One serialized connection; every mutation runs in a transaction.
pub struct ScannerStore {
    conn: Mutex<Connection>,
}

impl ScannerStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scanner_channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                frequency INTEGER NOT NULL,
                label TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                mode TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                enabled INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS scanner_lockouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                frequency INTEGER NOT NULL UNIQUE,
                label TEXT,
                added_ts INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS scanner_hits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                frequency INTEGER NOT NULL,
                strength_db REAL NOT NULL,
                duration_ms INTEGER NOT NULL,
                channel_id INTEGER,
                audio_clip_path TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_hits_ts ON scanner_hits (ts DESC);
            CREATE INDEX IF NOT EXISTS idx_hits_channel ON scanner_hits (channel_id);",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.seed_if_empty()?;
        Ok(store)
    }

    /// First-boot seed: the European PMR446 grid plus a couple of common
    /// UHF simplex calling channels.
    fn seed_if_empty(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM scanner_channels", [], |r| r.get(0))?;
        if count > 0 {
            return Ok(());
        }
        let seed: [(&str, u64, u8); 10] = [
            ("PMR446 Ch 1", 446_006_250, 3),
            ("PMR446 Ch 2", 446_018_750, 3),
            ("PMR446 Ch 3", 446_031_250, 3),
            ("PMR446 Ch 4", 446_043_750, 3),
            ("PMR446 Ch 5", 446_056_250, 3),
            ("PMR446 Ch 6", 446_068_750, 3),
            ("PMR446 Ch 7", 446_081_250, 3),
            ("PMR446 Ch 8", 446_093_750, 3),
            ("70cm Calling", 433_500_000, 1),
            ("70cm FM Simplex", 446_000_000, 2),
        ];
        let tx = conn.unchecked_transaction()?;
        for (label, frequency, priority) in seed {
            tx.execute(
                "INSERT INTO scanner_channels (frequency, label, category, mode, priority, enabled)
                 VALUES (?1, ?2, 'seed', 'NFM', ?3, 1)",
                params![frequency as i64, label, priority],
            )?;
        }
        tx.commit()?;
        tracing::info!(rows = seed.len(), "seeded scanner channel list");
        Ok(())
    }

    /// Enabled channels in the order the sweep cursor expects.
    pub fn enabled_channels(&self) -> Result<Vec<ScannerChannel>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare_cached(
            "SELECT id, frequency, label, category, mode, priority, enabled
             FROM scanner_channels WHERE enabled = 1
             ORDER BY priority ASC, frequency ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_channel)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_channels(&self) -> Result<Vec<ScannerChannel>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare_cached(
            "SELECT id, frequency, label, category, mode, priority, enabled
             FROM scanner_channels ORDER BY priority ASC, frequency ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_channel)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn add_channel(&self, spec: &ChannelSpec) -> Result<u32, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO scanner_channels (frequency, label, category, mode, priority, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                spec.frequency_hz as i64,
                spec.label,
                spec.category,
                mode_str(spec.mode),
                spec.priority,
                spec.enabled
            ],
        )?;
        Ok(conn.last_insert_rowid() as u32)
    }

    pub fn update_channel(&self, id: u32, patch: &ChannelPatch) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let tx = conn.unchecked_transaction()?;
        let existing = tx
            .query_row(
                "SELECT id, frequency, label, category, mode, priority, enabled
                 FROM scanner_channels WHERE id = ?1",
                [id],
                row_to_channel,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        let frequency = patch.frequency_hz.unwrap_or(existing.frequency_hz);
        let label = patch.label.clone().unwrap_or(existing.label);
        let category = patch.category.clone().unwrap_or(existing.category);
        let mode = patch.mode.unwrap_or(existing.mode);
        let priority = patch.priority.unwrap_or(existing.priority);
        let enabled = patch.enabled.unwrap_or(existing.enabled);
        tx.execute(
            "UPDATE scanner_channels
             SET frequency = ?1, label = ?2, category = ?3, mode = ?4, priority = ?5, enabled = ?6
             WHERE id = ?7",
            params![
                frequency as i64,
                label,
                category,
                mode_str(mode),
                priority,
                enabled,
                id
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_channel(&self, id: u32) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute("DELETE FROM scanner_channels WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Lockout keys are stored rounded to 1 kHz; re-adding an existing
    /// frequency is a no-op that returns the existing row id.
    pub fn add_lockout(&self, frequency_hz: u64, label: Option<&str>) -> Result<u32, StoreError> {
        let rounded = round_to_khz(frequency_hz);
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT OR IGNORE INTO scanner_lockouts (frequency, label, added_ts)
             VALUES (?1, ?2, ?3)",
            params![rounded as i64, label, now_ms() as i64],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM scanner_lockouts WHERE frequency = ?1",
            [rounded as i64],
            |r| r.get(0),
        )?;
        Ok(id as u32)
    }

    pub fn remove_lockout(&self, id: u32) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let n = conn.execute("DELETE FROM scanner_lockouts WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn lockouts(&self) -> Result<Vec<LockoutEntry>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare_cached(
            "SELECT id, frequency, label, added_ts FROM scanner_lockouts ORDER BY frequency ASC",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(LockoutEntry {
                    id: r.get::<_, i64>(0)? as u32,
                    frequency_hz: r.get::<_, i64>(1)? as u64,
                    label: r.get(2)?,
                    added_ts_ms: r.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn lockout_frequencies(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self.lockouts()?.into_iter().map(|l| l.frequency_hz).collect())
    }

    /// Inserts a hit and prunes the log to the newest 1000 rows in the
    /// same transaction.
    pub fn insert_hit(
        &self,
        ts_ms: u64,
        frequency_hz: u64,
        strength_db: f32,
        duration_ms: u32,
        channel_id: Option<u32>,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO scanner_hits (ts, frequency, strength_db, duration_ms, channel_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ts_ms as i64,
                frequency_hz as i64,
                strength_db,
                duration_ms,
                channel_id
            ],
        )?;
        let id = tx.last_insert_rowid() as u64;
        tx.execute(
            "DELETE FROM scanner_hits WHERE id NOT IN
             (SELECT id FROM scanner_hits ORDER BY ts DESC, id DESC LIMIT ?1)",
            [HIT_KEEP as i64],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn set_hit_clip(&self, hit_id: u64, path: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "UPDATE scanner_hits SET audio_clip_path = ?1 WHERE id = ?2",
            params![path, hit_id as i64],
        )?;
        Ok(())
    }

    pub fn recent_hits(&self, limit: usize) -> Result<Vec<HitRecord>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, frequency, strength_db, duration_ms, channel_id, audio_clip_path
             FROM scanner_hits ORDER BY ts DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |r| {
                Ok(HitRecord {
                    id: r.get::<_, i64>(0)? as u64,
                    wall_ts_ms: r.get::<_, i64>(1)? as u64,
                    frequency_hz: r.get::<_, i64>(2)? as u64,
                    strength_db: r.get(3)?,
                    duration_ms: r.get::<_, i64>(4)? as u32,
                    channel_id: r.get::<_, Option<i64>>(5)?.map(|v| v as u32),
                    audio_clip_path: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn hit_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM scanner_hits", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}

fn mode_str(mode: ChannelMode) -> &'static str {
    match mode {
        ChannelMode::Nfm => "NFM",
        ChannelMode::Am => "AM",
    }
}

fn row_to_channel(r: &rusqlite::Row<'_>) -> rusqlite::Result<ScannerChannel> {
    let mode: String = r.get(4)?;
    Ok(ScannerChannel {
        id: r.get::<_, i64>(0)? as u32,
        frequency_hz: r.get::<_, i64>(1)? as u64,
        label: r.get(2)?,
        category: r.get(3)?,
        mode: if mode == "AM" {
            ChannelMode::Am
        } else {
            ChannelMode::Nfm
        },
        priority: r.get(5)?,
        enabled: r.get(6)?,
    })
}
