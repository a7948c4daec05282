use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Demodulation mode of a virtual receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DemodMode {
    Nfm,
    Wfm,
    Am,
    Usb,
    Lsb,
}

/// Scanner channels demodulate narrow-band only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelMode {
    Nfm,
    Am,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    Idle,
    Scanning,
    SignalDetected,
    Parked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverSpec {
    pub id: String,
    pub center_freq_hz: u64,
    pub bandwidth_hz: u32,
    #[serde(default = "default_output_rate")]
    pub output_rate_hz: u32,
    pub mode: DemodMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoder: Option<String>,
}

fn default_output_rate() -> u32 {
    8_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub frequency_hz: u64,
    pub label: String,
    #[serde(default)]
    pub category: String,
    pub mode: ChannelMode,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> u8 {
    5
}
fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ChannelMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// A persisted priority channel row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerChannel {
    pub id: u32,
    pub frequency_hz: u64,
    pub label: String,
    pub category: String,
    pub mode: ChannelMode,
    pub priority: u8,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitRecord {
    pub id: u64,
    pub wall_ts_ms: u64,
    pub frequency_hz: u64,
    pub strength_db: f32,
    pub duration_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_clip_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockoutEntry {
    pub id: u32,
    pub frequency_hz: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub added_ts_ms: u64,
}

/// Full scanner snapshot, broadcast on every state transition and
/// periodically while parked.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerStatus {
    pub state: ScanState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_db: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_db: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub sweep_step: usize,
    pub sweep_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parked_ms: Option<u64>,
}

impl ScannerStatus {
    pub fn idle() -> Self {
        Self {
            state: ScanState::Idle,
            frequency_hz: None,
            signal_db: None,
            noise_db: None,
            channel: None,
            sweep_step: 0,
            sweep_steps: 0,
            parked_ms: None,
        }
    }
}

/// Events fanned out to subscribers as JSON text frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    FftMeta {
        center_freq_hz: u64,
        sample_rate_hz: u32,
        fft_size: u32,
    },
    IqMeta {
        sample_rate_hz: u32,
        center_freq_hz: u64,
        wall_ts_ms: u64,
    },
    ScannerState {
        #[serde(flatten)]
        status: ScannerStatus,
    },
    ScannerHit {
        #[serde(flatten)]
        hit: HitRecord,
    },
    ScannerFft {
        magnitudes_db: Vec<f32>,
    },
    ScannerMeta {
        state: ScanState,
        frequency_hz: u64,
        signal_db: f32,
        noise_db: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    SdrConnected {
        tuner: String,
        gain_count: u32,
    },
    SdrDisconnected {
        cause: String,
    },
    MuxConnected {
        tuner: String,
    },
    MuxDisconnected {
        cause: String,
    },
}

/// Typed control-plane commands. The transport that carries them (WS text,
/// HTTP, IPC) is a collaborator concern; this is the only shape the core
/// accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    StartMux,
    StopMux,
    AddReceiver {
        spec: ReceiverSpec,
    },
    RemoveReceiver {
        id: String,
    },
    TuneReceiver {
        id: String,
        frequency_hz: u64,
    },
    StartScanner {
        #[serde(default)]
        opts: Option<crate::config::ScannerConfig>,
    },
    StopScanner,
    Lock {
        frequency_hz: u64,
    },
    Unlock,
    LockoutCurrent,
    AddLockout {
        frequency_hz: u64,
        #[serde(default)]
        label: Option<String>,
    },
    RemoveLockout {
        id: u32,
    },
    AddChannel {
        spec: ChannelSpec,
    },
    UpdateChannel {
        id: u32,
        patch: ChannelPatch,
    },
    DeleteChannel {
        id: u32,
    },
    SetDevice {
        #[serde(default)]
        frequency_hz: Option<u64>,
        #[serde(default)]
        sample_rate_hz: Option<u32>,
        #[serde(default)]
        gain_db: Option<f32>,
        #[serde(default)]
        agc: Option<bool>,
    },
}

/// Structured command result: `{ok: true, state}` or
/// `{ok: false, kind, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl CommandOutcome {
    pub fn success(state: Value) -> Self {
        Self {
            ok: true,
            kind: None,
            message: None,
            state: Some(state),
        }
    }

    pub fn failure(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            kind: Some(kind),
            message: Some(message.into()),
            state: None,
        }
    }
}

pub fn event_json(event: &Event) -> String {
    match serde_json::to_string(event) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = ?e, "failed to serialize event");
            "{}".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_their_type_discriminator() {
        let json = event_json(&Event::FftMeta {
            center_freq_hz: 446_050_000,
            sample_rate_hz: 2_048_000,
            fft_size: 2048,
        });
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "fft_meta");
        assert_eq!(v["fft_size"], 2048);
    }

    #[test]
    fn scanner_state_flattens_the_snapshot() {
        let json = event_json(&Event::ScannerState {
            status: ScannerStatus::idle(),
        });
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "scanner_state");
        assert_eq!(v["state"], "IDLE");
        assert!(v.get("frequency_hz").is_none());
    }

    #[test]
    fn commands_parse_from_tagged_json() {
        let cmd: ControlCommand = serde_json::from_str(
            r#"{"type":"tune_receiver","id":"rx0","frequency_hz":145500000}"#,
        )
        .unwrap();
        match cmd {
            ControlCommand::TuneReceiver { id, frequency_hz } => {
                assert_eq!(id, "rx0");
                assert_eq!(frequency_hz, 145_500_000);
            }
            other => panic!("unexpected {other:?}"),
        }

        let cmd: ControlCommand =
            serde_json::from_str(r#"{"type":"set_device","gain_db":33.8}"#).unwrap();
        match cmd {
            ControlCommand::SetDevice {
                frequency_hz,
                gain_db,
                ..
            } => {
                assert!(frequency_hz.is_none());
                assert_eq!(gain_db, Some(33.8));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn receiver_spec_defaults_output_rate() {
        let spec: ReceiverSpec = serde_json::from_str(
            r#"{"id":"a","center_freq_hz":446062500,"bandwidth_hz":12500,"mode":"NFM"}"#,
        )
        .unwrap();
        assert_eq!(spec.output_rate_hz, 8000);
    }
}
