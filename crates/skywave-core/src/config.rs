use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub sdr: Sdr,
    #[serde(default)]
    pub spectrum: Spectrum,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub storage: Storage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// The rtl_tcp upstream and the multiplexer defaults applied on connect.
#[derive(Debug, Clone, Deserialize)]
pub struct Sdr {
    #[serde(default = "default_sdr_host")]
    pub host: String,
    #[serde(default = "default_sdr_port")]
    pub port: u16,
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_frequency")]
    pub frequency_hz: u64,
    /// None means hardware AGC.
    #[serde(default)]
    pub gain_db: Option<f32>,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// WFM de-emphasis time constant (75 in most regions, 50 in region 1).
    #[serde(default = "default_deemphasis_us")]
    pub deemphasis_us: f64,
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Spectrum {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_meta_interval_ms")]
    pub meta_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreqRange {
    pub start_hz: u64,
    pub end_hz: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_ranges")]
    pub ranges: Vec<FreqRange>,
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f32,
    #[serde(default = "default_squelch_timeout_ms")]
    pub squelch_timeout_ms: u64,
    #[serde(default = "default_max_park_ms")]
    pub max_park_ms: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_scanner_gain")]
    pub gain_db: f32,
    #[serde(default = "default_priority_interval")]
    pub priority_interval: usize,
    #[serde(default = "default_scanner_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_audio_rate")]
    pub audio_rate_hz: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    /// Per-subscriber queue depth before eviction.
    #[serde(default = "default_queue_msgs")]
    pub subscriber_queue_msgs: usize,
    /// Per-subscriber queued-byte budget before eviction.
    #[serde(default = "default_queue_bytes")]
    pub subscriber_queue_bytes: usize,
    #[serde(default = "default_client_limit")]
    pub main_clients: usize,
    #[serde(default = "default_client_limit")]
    pub signal_clients: usize,
    #[serde(default = "default_client_limit")]
    pub scanner_audio_clients: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: String,
}

fn default_host() -> String {
    "[::]".to_string()
}
fn default_port() -> u16 {
    9010
}
fn default_sdr_host() -> String {
    "127.0.0.1".to_string()
}
fn default_sdr_port() -> u16 {
    1234
}
fn default_sample_rate() -> u32 {
    2_048_000
}
fn default_frequency() -> u64 {
    446_050_000
}
fn default_fft_size() -> usize {
    2048
}
fn default_frame_samples() -> usize {
    4096
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_autostart() -> bool {
    true
}
fn default_flush_interval_ms() -> u64 {
    8
}
fn default_meta_interval_ms() -> u64 {
    1000
}
fn default_ranges() -> Vec<FreqRange> {
    vec![FreqRange {
        start_hz: 446_000_000,
        end_hz: 446_200_000,
    }]
}
fn default_dwell_ms() -> u64 {
    100
}
fn default_threshold_db() -> f32 {
    10.0
}
fn default_squelch_timeout_ms() -> u64 {
    3000
}
fn default_max_park_ms() -> u64 {
    15_000
}
fn default_scanner_gain() -> f32 {
    40.0
}
fn default_priority_interval() -> usize {
    3
}
fn default_scanner_fft_size() -> usize {
    2048
}
fn default_audio_rate() -> u32 {
    8000
}
fn default_deemphasis_us() -> f64 {
    75.0
}
fn default_queue_msgs() -> usize {
    64
}
fn default_queue_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_client_limit() -> usize {
    1000
}
fn default_db_path() -> String {
    "skywave.db".to_string()
}
fn default_recordings_dir() -> String {
    "recordings".to_string()
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for Sdr {
    fn default() -> Self {
        Self {
            host: default_sdr_host(),
            port: default_sdr_port(),
            sample_rate_hz: default_sample_rate(),
            frequency_hz: default_frequency(),
            gain_db: None,
            fft_size: default_fft_size(),
            frame_samples: default_frame_samples(),
            connect_timeout_ms: default_connect_timeout_ms(),
            deemphasis_us: default_deemphasis_us(),
            autostart: default_autostart(),
        }
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            meta_interval_ms: default_meta_interval_ms(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            ranges: default_ranges(),
            dwell_ms: default_dwell_ms(),
            threshold_db: default_threshold_db(),
            squelch_timeout_ms: default_squelch_timeout_ms(),
            max_park_ms: default_max_park_ms(),
            sample_rate_hz: default_sample_rate(),
            gain_db: default_scanner_gain(),
            priority_interval: default_priority_interval(),
            fft_size: default_scanner_fft_size(),
            audio_rate_hz: default_audio_rate(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            subscriber_queue_msgs: default_queue_msgs(),
            subscriber_queue_bytes: default_queue_bytes(),
            main_clients: default_client_limit(),
            signal_clients: default_client_limit(),
            scanner_audio_clients: default_client_limit(),
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            recordings_dir: default_recordings_dir(),
        }
    }
}

const ALLOWED_FFT_SIZES: [usize; 5] = [512, 1024, 2048, 4096, 8192];

pub fn validate_fft_size(fft_size: usize) -> anyhow::Result<()> {
    anyhow::ensure!(
        ALLOWED_FFT_SIZES.contains(&fft_size),
        "fft_size must be one of {ALLOWED_FFT_SIZES:?} (got {fft_size})"
    );
    Ok(())
}

pub fn validate_scanner(scanner: &ScannerConfig) -> anyhow::Result<()> {
    anyhow::ensure!(!scanner.ranges.is_empty(), "scanner.ranges must not be empty");
    for r in scanner.ranges.iter() {
        anyhow::ensure!(
            r.start_hz < r.end_hz,
            "scanner range start {} must be below end {}",
            r.start_hz,
            r.end_hz
        );
    }
    anyhow::ensure!(scanner.dwell_ms > 0, "scanner.dwell_ms must be > 0");
    anyhow::ensure!(
        scanner.sample_rate_hz > 0,
        "scanner.sample_rate_hz must be > 0"
    );
    anyhow::ensure!(
        scanner.audio_rate_hz > 0,
        "scanner.audio_rate_hz must be > 0"
    );
    anyhow::ensure!(
        scanner.squelch_timeout_ms <= scanner.max_park_ms,
        "scanner.squelch_timeout_ms must not exceed scanner.max_park_ms"
    );
    validate_fft_size(scanner.fft_size)
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_fft_size(self.sdr.fft_size).context("sdr")?;
        anyhow::ensure!(self.sdr.sample_rate_hz > 0, "sdr.sample_rate_hz must be > 0");
        anyhow::ensure!(
            self.sdr.frame_samples >= self.sdr.fft_size,
            "sdr.frame_samples must be >= sdr.fft_size"
        );
        anyhow::ensure!(
            self.limits.subscriber_queue_msgs > 0,
            "limits.subscriber_queue_msgs must be > 0"
        );
        validate_scanner(&self.scanner).context("scanner")
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn bad_fft_size_is_rejected() {
        let mut cfg = Config::default();
        cfg.sdr.fft_size = 3000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_scanner_range_is_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.ranges = vec![FreqRange {
            start_hz: 446_200_000,
            end_hz: 446_000_000,
        }];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"sdr":{"frequency_hz":145000000}}"#).unwrap();
        assert_eq!(cfg.sdr.frequency_hz, 145_000_000);
        assert_eq!(cfg.sdr.sample_rate_hz, 2_048_000);
        assert_eq!(cfg.spectrum.flush_interval_ms, 8);
        assert_eq!(cfg.scanner.priority_interval, 3);
    }
}
