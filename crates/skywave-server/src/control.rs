use crate::scanner::ScannerCmd;
use crate::state::AppState;
use crate::store::StoreError;
use skywave_core::error::ControlError;
use skywave_core::protocol::{CommandOutcome, ControlCommand};
use std::sync::Arc;
use std::time::Duration;

/// Grace period between releasing the device and the next owner taking
/// it, so the rtl_tcp server finishes tearing down the old session.
const HANDOVER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOwner {
    Idle,
    Mux,
    Scanner,
}

impl DeviceOwner {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Mux => "mux",
            Self::Scanner => "scanner",
        }
    }
}

/// Validates and executes one control command. Blocking (device handover
/// sleeps); callers on a reactor thread wrap this in `spawn_blocking`.
pub fn handle_command(state: &Arc<AppState>, cmd: ControlCommand) -> CommandOutcome {
    let label = command_label(&cmd);
    match dispatch(state, cmd) {
        Ok(()) => CommandOutcome::success(state.snapshot()),
        Err(e) => {
            tracing::warn!(command = label, error = %e, "command rejected");
            CommandOutcome::failure(e.kind_name(), e.to_string())
        }
    }
}

fn dispatch(state: &Arc<AppState>, cmd: ControlCommand) -> Result<(), ControlError> {
    match cmd {
        ControlCommand::StartMux => start_mux(state),
        ControlCommand::StopMux => {
            let mut owner = state.owner.lock().unwrap_or_else(|p| p.into_inner());
            if *owner == DeviceOwner::Mux {
                state.mux.stop();
                *owner = DeviceOwner::Idle;
            }
            Ok(())
        }
        ControlCommand::StartScanner { opts } => {
            let mut owner = state.owner.lock().unwrap_or_else(|p| p.into_inner());
            if *owner == DeviceOwner::Mux {
                tracing::info!("pausing multiplexer for scanner handover");
                state.mux.stop();
                std::thread::sleep(HANDOVER_GRACE);
            }
            state.scanner.start(opts)?;
            *owner = DeviceOwner::Scanner;
            Ok(())
        }
        ControlCommand::StopScanner => {
            let resume_mux = {
                let mut owner = state.owner.lock().unwrap_or_else(|p| p.into_inner());
                let was_scanner = *owner == DeviceOwner::Scanner;
                if was_scanner {
                    state.scanner.stop();
                    *owner = DeviceOwner::Idle;
                }
                was_scanner && state.cfg.sdr.autostart
            };
            if resume_mux {
                tracing::info!("scanner stopped; resuming multiplexer");
                std::thread::sleep(HANDOVER_GRACE);
                start_mux(state)?;
            }
            Ok(())
        }
        ControlCommand::AddReceiver { spec } => state.mux.add_receiver(spec),
        ControlCommand::RemoveReceiver { id } => {
            state.mux.remove_receiver(&id);
            Ok(())
        }
        ControlCommand::TuneReceiver { id, frequency_hz } => {
            state.mux.retune_receiver(&id, frequency_hz)
        }
        ControlCommand::Lock { frequency_hz } => {
            if frequency_hz == 0 {
                return Err(ControlError::Validation("frequency_hz must be > 0".into()));
            }
            state.scanner.send_cmd(ScannerCmd::Lock { frequency_hz })
        }
        ControlCommand::Unlock => state.scanner.send_cmd(ScannerCmd::Unlock),
        ControlCommand::LockoutCurrent => state.scanner.lockout_current(),
        ControlCommand::AddLockout {
            frequency_hz,
            label,
        } => {
            if frequency_hz == 0 {
                return Err(ControlError::Validation("frequency_hz must be > 0".into()));
            }
            state
                .store
                .add_lockout(frequency_hz, label.as_deref())
                .map_err(store_err)?;
            refresh_scanner(state);
            Ok(())
        }
        ControlCommand::RemoveLockout { id } => {
            state.store.remove_lockout(id).map_err(store_err)?;
            refresh_scanner(state);
            Ok(())
        }
        ControlCommand::AddChannel { spec } => {
            if spec.frequency_hz == 0 {
                return Err(ControlError::Validation("frequency_hz must be > 0".into()));
            }
            if spec.label.trim().is_empty() {
                return Err(ControlError::Validation("label must not be empty".into()));
            }
            state.store.add_channel(&spec).map_err(store_err)?;
            refresh_scanner(state);
            Ok(())
        }
        ControlCommand::UpdateChannel { id, patch } => {
            state.store.update_channel(id, &patch).map_err(store_err)?;
            refresh_scanner(state);
            Ok(())
        }
        ControlCommand::DeleteChannel { id } => {
            state.store.delete_channel(id).map_err(store_err)?;
            refresh_scanner(state);
            Ok(())
        }
        ControlCommand::SetDevice {
            frequency_hz,
            sample_rate_hz,
            gain_db,
            agc,
        } => {
            let owner = *state.owner.lock().unwrap_or_else(|p| p.into_inner());
            match owner {
                DeviceOwner::Scanner => {
                    if frequency_hz.is_some() || sample_rate_hz.is_some() {
                        return Err(ControlError::Validation(
                            "scanner owns the tuner; stop it before retuning the device".into(),
                        ));
                    }
                    if let Some(db) = gain_db {
                        state.scanner.set_gain(db)?;
                    }
                    Ok(())
                }
                DeviceOwner::Mux | DeviceOwner::Idle => {
                    state.mux.set_device(frequency_hz, sample_rate_hz, gain_db, agc)
                }
            }
        }
    }
}

fn start_mux(state: &Arc<AppState>) -> Result<(), ControlError> {
    let mut owner = state.owner.lock().unwrap_or_else(|p| p.into_inner());
    match *owner {
        DeviceOwner::Scanner => Err(ControlError::DeviceBusy("scanner")),
        DeviceOwner::Mux => Ok(()),
        DeviceOwner::Idle => {
            state.mux.start();
            *owner = DeviceOwner::Mux;
            Ok(())
        }
    }
}

fn refresh_scanner(state: &Arc<AppState>) {
    if state.scanner.is_running() {
        let _ = state.scanner.send_cmd(ScannerCmd::RefreshStore);
    }
}

fn store_err(e: StoreError) -> ControlError {
    match e {
        StoreError::NotFound => ControlError::NotFound("row"),
        other => ControlError::Storage(other.to_string()),
    }
}

fn command_label(cmd: &ControlCommand) -> &'static str {
    match cmd {
        ControlCommand::StartMux => "start_mux",
        ControlCommand::StopMux => "stop_mux",
        ControlCommand::AddReceiver { .. } => "add_receiver",
        ControlCommand::RemoveReceiver { .. } => "remove_receiver",
        ControlCommand::TuneReceiver { .. } => "tune_receiver",
        ControlCommand::StartScanner { .. } => "start_scanner",
        ControlCommand::StopScanner => "stop_scanner",
        ControlCommand::Lock { .. } => "lock",
        ControlCommand::Unlock => "unlock",
        ControlCommand::LockoutCurrent => "lockout_current",
        ControlCommand::AddLockout { .. } => "add_lockout",
        ControlCommand::RemoveLockout { .. } => "remove_lockout",
        ControlCommand::AddChannel { .. } => "add_channel",
        ControlCommand::UpdateChannel { .. } => "update_channel",
        ControlCommand::DeleteChannel { .. } => "delete_channel",
        ControlCommand::SetDevice { .. } => "set_device",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skywave_core::protocol::{ChannelMode, ChannelSpec};

    fn test_state() -> Arc<AppState> {
        AppState::for_tests()
    }

    #[test]
    fn scanner_commands_require_a_running_scanner() {
        let state = test_state();
        let out = handle_command(&state, ControlCommand::Unlock);
        assert!(!out.ok);
        assert_eq!(out.kind, Some("VALIDATION"));
    }

    #[test]
    fn lockout_current_requires_parked() {
        let state = test_state();
        let out = handle_command(&state, ControlCommand::LockoutCurrent);
        assert!(!out.ok);
        assert_eq!(out.kind, Some("NOT_PARKED"));
    }

    #[test]
    fn channel_crud_round_trips_through_the_store() {
        let state = test_state();
        let before = state.store.all_channels().unwrap().len();
        let out = handle_command(
            &state,
            ControlCommand::AddChannel {
                spec: ChannelSpec {
                    frequency_hz: 462_562_500,
                    label: "FRS 1".to_string(),
                    category: "frs".to_string(),
                    mode: ChannelMode::Nfm,
                    priority: 2,
                    enabled: true,
                },
            },
        );
        assert!(out.ok, "{:?}", out.message);
        assert_eq!(state.store.all_channels().unwrap().len(), before + 1);
    }

    #[test]
    fn empty_channel_label_is_rejected() {
        let state = test_state();
        let out = handle_command(
            &state,
            ControlCommand::AddChannel {
                spec: ChannelSpec {
                    frequency_hz: 462_562_500,
                    label: "  ".to_string(),
                    category: String::new(),
                    mode: ChannelMode::Nfm,
                    priority: 2,
                    enabled: true,
                },
            },
        );
        assert!(!out.ok);
        assert_eq!(out.kind, Some("VALIDATION"));
    }

    #[test]
    fn removing_a_missing_lockout_reports_not_found() {
        let state = test_state();
        let out = handle_command(&state, ControlCommand::RemoveLockout { id: 999 });
        assert!(!out.ok);
        assert_eq!(out.kind, Some("NOT_FOUND"));
    }

    #[test]
    fn snapshot_reports_the_device_owner() {
        let state = test_state();
        let out = handle_command(
            &state,
            ControlCommand::AddLockout {
                frequency_hz: 446_062_500,
                label: None,
            },
        );
        assert!(out.ok);
        let snap = out.state.unwrap();
        assert_eq!(snap["device_owner"], "idle");
        assert_eq!(snap["lockouts"], 1);
    }
}
