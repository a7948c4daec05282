use crate::control::DeviceOwner;
use crate::fanout::Hub;
use crate::mux::Mux;
use crate::scanner::Scanner;
use crate::store::ScannerStore;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use skywave_core::config::Config;
use std::sync::{Arc, Mutex};

pub struct AppState {
    pub cfg: Config,
    pub hub: Arc<Hub>,
    pub store: Arc<ScannerStore>,
    pub mux: Arc<Mux>,
    pub scanner: Arc<Scanner>,
    pub owner: Mutex<DeviceOwner>,
}

impl AppState {
    pub fn new(cfg: Config, store: Arc<ScannerStore>) -> Arc<Self> {
        let hub = Arc::new(Hub::new(
            cfg.limits.subscriber_queue_msgs,
            cfg.limits.subscriber_queue_bytes,
        ));
        let mux = Mux::new(cfg.sdr.clone(), cfg.spectrum.clone(), hub.clone());
        let scanner = Scanner::new(
            cfg.scanner.clone(),
            cfg.sdr.clone(),
            cfg.storage.recordings_dir.clone().into(),
            hub.clone(),
            store.clone(),
        );
        Arc::new(Self {
            cfg,
            hub,
            store,
            mux,
            scanner,
            owner: Mutex::new(DeviceOwner::Idle),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Arc<Self> {
        let store = Arc::new(ScannerStore::open_in_memory().expect("in-memory store"));
        let mut cfg = Config::default();
        cfg.sdr.autostart = false;
        Self::new(cfg, store)
    }

    /// State snapshot attached to every successful command result.
    pub fn snapshot(&self) -> Value {
        let owner = *self.owner.lock().unwrap_or_else(|p| p.into_inner());
        json!({
            "device_owner": owner.name(),
            "mux": {
                "running": self.mux.is_running(),
                "connected": self.mux.is_connected(),
                "receivers": self.mux.receiver_specs(),
            },
            "scanner": self.scanner.status(),
            "channels": self.store.all_channels().map(|c| c.len()).unwrap_or(0),
            "lockouts": self.store.lockouts().map(|l| l.len()).unwrap_or(0),
        })
    }
}

pub async fn server_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": "skywave",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": {
            "main": state.hub.main.subscriber_count(),
            "signal": state.hub.signal.subscriber_count(),
            "scanner_audio": state.hub.scanner_audio.subscriber_count(),
        },
        "state": state.snapshot(),
    }))
}
