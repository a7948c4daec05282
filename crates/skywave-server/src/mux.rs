use crate::batcher::SpectrumBatcher;
use crate::fanout::{ChannelKind, Hub};
use crate::receiver::VirtualReceiver;
use crate::spectrum::SpectrumAnalyzer;
use crate::transport::{spawn_reader, RtlTcpClient, RtlTcpConfig};
use bytes::Bytes;
use rand::Rng;
use skywave_core::config::{Sdr, Spectrum};
use skywave_core::error::ControlError;
use skywave_core::protocol::{Event, ReceiverSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RECONNECT_BASE: Duration = Duration::from_secs(2);
const RECONNECT_CAP: Duration = Duration::from_secs(60);
const IQ_RING_DEPTH: usize = 8;

/// Binary framing for per-receiver audio on the main channel:
/// `[b'A'][id_len: u8][id utf-8][f32 LE samples]`.
fn audio_frame(id: &str, samples: &[f32]) -> Bytes {
    let id_bytes = id.as_bytes();
    let id_len = id_bytes.len().min(255);
    let mut out = Vec::with_capacity(2 + id_len + samples.len() * 4);
    out.push(b'A');
    out.push(id_len as u8);
    out.extend_from_slice(&id_bytes[..id_len]);
    out.extend_from_slice(bytemuck::cast_slice(samples));
    Bytes::from(out)
}

#[derive(Debug, Clone)]
struct DeviceSettings {
    frequency_hz: u64,
    sample_rate_hz: u32,
    gain_db: Option<f32>,
}

/// The SDR multiplexer: sole consumer of the device's IQ ring while
/// active. Produces whole-band FFT batches and one audio stream per
/// virtual receiver; reconnects with exponential backoff until stopped.
pub struct Mux {
    sdr: Sdr,
    spectrum: Spectrum,
    hub: Arc<Hub>,
    device: Mutex<DeviceSettings>,
    receivers: Arc<Mutex<HashMap<String, VirtualReceiver>>>,
    client: Mutex<Option<Arc<RtlTcpClient>>>,
    stop: Mutex<Option<Arc<AtomicBool>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    running: AtomicBool,
    connected: AtomicBool,
}

impl Mux {
    pub fn new(sdr: Sdr, spectrum: Spectrum, hub: Arc<Hub>) -> Arc<Self> {
        let device = DeviceSettings {
            frequency_hz: sdr.frequency_hz,
            sample_rate_hz: sdr.sample_rate_hz,
            gain_db: sdr.gain_db,
        };
        Arc::new(Self {
            sdr,
            spectrum,
            hub,
            device: Mutex::new(device),
            receivers: Arc::new(Mutex::new(HashMap::new())),
            client: Mutex::new(None),
            stop: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Idempotent; the worker owns the device until `stop`.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        *self.stop.lock().unwrap_or_else(|p| p.into_inner()) = Some(stop.clone());
        let mux = self.clone();
        let handle = std::thread::Builder::new()
            .name("mux-worker".to_string())
            .spawn(move || run_worker(mux, stop))
            .expect("spawn mux worker thread");
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    /// Stops the worker and waits for the device to be released. The
    /// worker checks the stop flag at every frame boundary, so this
    /// returns well inside the 500 ms shutdown budget.
    pub fn stop(&self) {
        let stop = self.stop.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(stop) = stop {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(client) = self
            .client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
        {
            client.disconnect();
        }
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn add_receiver(&self, spec: ReceiverSpec) -> Result<(), ControlError> {
        if spec.id.trim().is_empty() {
            return Err(ControlError::Validation("receiver id must not be empty".into()));
        }
        let device = self.device_settings();
        let rx = VirtualReceiver::new(
            spec.clone(),
            device.frequency_hz,
            device.sample_rate_hz,
            self.sdr.deemphasis_us,
        )?;
        let mut receivers = self.receivers.lock().unwrap_or_else(|p| p.into_inner());
        if receivers.contains_key(&spec.id) {
            return Err(ControlError::Validation(format!(
                "receiver {:?} already exists",
                spec.id
            )));
        }
        tracing::info!(
            id = %spec.id,
            frequency_hz = spec.center_freq_hz,
            bandwidth_hz = spec.bandwidth_hz,
            mode = ?spec.mode,
            "receiver added"
        );
        receivers.insert(spec.id, rx);
        Ok(())
    }

    pub fn remove_receiver(&self, id: &str) {
        let removed = self
            .receivers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(id, "receiver removed");
        }
    }

    pub fn retune_receiver(&self, id: &str, frequency_hz: u64) -> Result<(), ControlError> {
        let device = self.device_settings();
        let mut receivers = self.receivers.lock().unwrap_or_else(|p| p.into_inner());
        let rx = receivers
            .get_mut(id)
            .ok_or(ControlError::NotFound("receiver"))?;
        rx.retune(frequency_hz, device.frequency_hz, device.sample_rate_hz)
    }

    pub fn receiver_specs(&self) -> Vec<ReceiverSpec> {
        self.receivers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .map(|rx| rx.spec.clone())
            .collect()
    }

    pub fn set_device(
        &self,
        frequency_hz: Option<u64>,
        sample_rate_hz: Option<u32>,
        gain_db: Option<f32>,
        agc: Option<bool>,
    ) -> Result<(), ControlError> {
        if let Some(rate) = sample_rate_hz {
            if rate == 0 {
                return Err(ControlError::Validation("sample_rate_hz must be > 0".into()));
            }
        }
        let client = self
            .client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        {
            let mut device = self.device.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(hz) = frequency_hz {
                device.frequency_hz = hz;
            }
            if let Some(rate) = sample_rate_hz {
                device.sample_rate_hz = rate;
            }
            if let Some(db) = gain_db {
                device.gain_db = Some(db);
            }
            if agc == Some(true) {
                device.gain_db = None;
            }
        }

        if let Some(client) = client {
            let io_err =
                |e: std::io::Error| ControlError::Validation(format!("device command failed: {e}"));
            if let Some(hz) = frequency_hz {
                client.set_frequency(hz).map_err(io_err)?;
            }
            if let Some(rate) = sample_rate_hz {
                client.set_sample_rate(rate).map_err(io_err)?;
            }
            if let Some(db) = gain_db {
                client.set_gain(db).map_err(io_err)?;
            }
            if let Some(on) = agc {
                client.set_agc(on).map_err(io_err)?;
            }
        }

        if frequency_hz.is_some() || sample_rate_hz.is_some() {
            let device = self.device_settings();
            let mut receivers = self.receivers.lock().unwrap_or_else(|p| p.into_inner());
            for rx in receivers.values_mut() {
                rx.parent_retuned(device.frequency_hz, device.sample_rate_hz);
            }
        }
        Ok(())
    }

    fn device_settings(&self) -> DeviceSettings {
        self.device
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn rtl_config(&self) -> RtlTcpConfig {
        let device = self.device_settings();
        RtlTcpConfig {
            host: self.sdr.host.clone(),
            port: self.sdr.port,
            frequency_hz: device.frequency_hz,
            sample_rate_hz: device.sample_rate_hz,
            gain_db: device.gain_db,
            connect_timeout: Duration::from_millis(self.sdr.connect_timeout_ms),
            frame_samples: self.sdr.frame_samples,
        }
    }
}

fn run_worker(mux: Arc<Mux>, stop: Arc<AtomicBool>) {
    let mut analyzer = match SpectrumAnalyzer::new(mux.sdr.fft_size) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "mux analyzer init failed");
            mux.running.store(false, Ordering::SeqCst);
            return;
        }
    };
    let mut batcher = SpectrumBatcher::new(
        mux.hub.clone(),
        mux.spectrum.flush_interval_ms,
        mux.spectrum.meta_interval_ms,
    );
    let mut attempt = 0u32;

    while !stop.load(Ordering::Relaxed) {
        let client = match RtlTcpClient::connect(&mux.rtl_config()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!(error = %e, attempt, "mux connect failed");
                mux.hub.broadcast_event(
                    ChannelKind::Main,
                    &Event::SdrDisconnected {
                        cause: e.kind_name().to_string(),
                    },
                );
                backoff_sleep(attempt, &stop);
                attempt += 1;
                continue;
            }
        };
        attempt = 0;
        *mux.client.lock().unwrap_or_else(|p| p.into_inner()) = Some(client.clone());
        mux.connected.store(true, Ordering::SeqCst);
        mux.hub.broadcast_event(
            ChannelKind::Main,
            &Event::SdrConnected {
                tuner: client.tuner.to_string(),
                gain_count: client.gain_count,
            },
        );
        mux.hub.broadcast_event(
            ChannelKind::Main,
            &Event::MuxConnected {
                tuner: client.tuner.to_string(),
            },
        );

        let (frames_tx, frames_rx) = sync_channel(IQ_RING_DEPTH);
        let reader = spawn_reader(client.clone(), frames_tx, stop.clone());
        let mut last_meta = (0u64, 0u32);

        loop {
            if stop.load(Ordering::Relaxed) {
                client.disconnect();
            }
            match frames_rx.recv_timeout(Duration::from_millis(250)) {
                Ok(frame) => {
                    let meta = (frame.center_freq_hz, frame.sample_rate_hz);
                    if meta != last_meta {
                        last_meta = meta;
                        mux.hub.broadcast_event(
                            ChannelKind::Main,
                            &Event::IqMeta {
                                sample_rate_hz: frame.sample_rate_hz,
                                center_freq_hz: frame.center_freq_hz,
                                wall_ts_ms: frame.wall_ts_ms,
                            },
                        );
                    }

                    let fft = analyzer.analyze(&frame);
                    batcher.push(fft);

                    let mut receivers = mux.receivers.lock().unwrap_or_else(|p| p.into_inner());
                    for rx in receivers.values_mut() {
                        let id = rx.spec.id.clone();
                        let audio = rx.process(&frame);
                        mux.hub
                            .broadcast_binary(ChannelKind::Main, audio_frame(&id, audio));
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let cause = reader.join().unwrap_or("io_error");
        batcher.flush();
        *mux.client.lock().unwrap_or_else(|p| p.into_inner()) = None;
        mux.connected.store(false, Ordering::SeqCst);
        mux.hub.broadcast_event(
            ChannelKind::Main,
            &Event::SdrDisconnected {
                cause: cause.to_string(),
            },
        );
        mux.hub.broadcast_event(
            ChannelKind::Main,
            &Event::MuxDisconnected {
                cause: cause.to_string(),
            },
        );

        if stop.load(Ordering::Relaxed) {
            break;
        }
        backoff_sleep(attempt, &stop);
        attempt += 1;
    }
    mux.running.store(false, Ordering::SeqCst);
}

/// Exponential backoff with jitter: base 2 s doubling to a 60 s cap,
/// scaled by a random factor in [0.75, 1.25). Polls the stop flag so
/// shutdown is never held hostage by a sleep.
fn backoff_sleep(attempt: u32, stop: &AtomicBool) {
    let exp = RECONNECT_BASE
        .saturating_mul(1u32 << attempt.min(5))
        .min(RECONNECT_CAP);
    let jitter = rand::thread_rng().gen_range(0.75f64..1.25);
    let total = exp.mul_f64(jitter);
    let deadline = std::time::Instant::now() + total;
    while std::time::Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
