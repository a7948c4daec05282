pub mod detect;
pub mod recorder;
pub mod sweep;

use crate::fanout::{ChannelKind, Hub};
use crate::receiver::VirtualReceiver;
use crate::spectrum::SpectrumAnalyzer;
use crate::store::ScannerStore;
use crate::transport::{spawn_reader, RtlTcpClient, RtlTcpConfig};
use bytes::Bytes;
use detect::{detect_signal, is_locked, level_at_bin, Detection, NoiseFloors};
use recorder::VoxRecorder;
use skywave_core::config::{validate_scanner, ScannerConfig, Sdr};
use skywave_core::error::ControlError;
use skywave_core::frame::IqFrame;
use skywave_core::protocol::{
    ChannelMode, DemodMode, Event, ReceiverSpec, ScanState, ScannerChannel, ScannerStatus,
};
use skywave_core::util::now_ms;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sweep::{build_slice_centers, SweepCursor, SweepStep};

/// Default parked channel bandwidth for close-call hits.
const PARK_BANDWIDTH_HZ: u32 = 12_500;
/// A detection within this distance of a stored channel adopts its label
/// and mode.
const CHANNEL_MATCH_HZ: u64 = 5_000;
/// Downsampled UI spectrum cap and cadence.
const SCANNER_FFT_BINS: usize = 512;
const SCANNER_FFT_INTERVAL_MS: u64 = 100;
/// Parked snapshots are republished at this cadence.
const PARKED_STATE_INTERVAL_MS: u64 = 1000;

/// Device tuning seam: the engine drives it, the worker hands it the live
/// rtl_tcp client, tests hand it a stub.
pub trait ScannerTuner: Send + Sync {
    fn set_frequency(&self, hz: u64) -> std::io::Result<()>;
}

impl ScannerTuner for RtlTcpClient {
    fn set_frequency(&self, hz: u64) -> std::io::Result<()> {
        RtlTcpClient::set_frequency(self, hz)
    }
}

#[derive(Debug)]
pub enum ScannerCmd {
    Lock { frequency_hz: u64 },
    Unlock,
    LockoutCurrent,
    RefreshStore,
}

struct Parked {
    frequency_hz: u64,
    bin: u32,
    channel: Option<ScannerChannel>,
    parked_at_ms: u64,
    last_signal_ms: u64,
    last_state_emit_ms: u64,
    peak_db: f32,
    ddc: VirtualReceiver,
}

enum EngineState {
    Scanning { dwell_started_ms: u64 },
    Parked(Box<Parked>),
}

/// The sweep state machine. Pure apart from the tuner seam, the hub and
/// the store, so tests can drive it frame by frame with synthesized IQ.
pub struct ScannerEngine {
    cfg: ScannerConfig,
    tuner: Arc<dyn ScannerTuner>,
    hub: Arc<Hub>,
    store: Arc<ScannerStore>,
    cursor: SweepCursor,
    channels: Vec<ScannerChannel>,
    lockouts: Vec<u64>,
    noise: NoiseFloors,
    analyzer: SpectrumAnalyzer,
    recorder: VoxRecorder,
    state: EngineState,
    current_center_hz: u64,
    current_channel: Option<ScannerChannel>,
    last_fft_emit_ms: u64,
    fft_scratch: Vec<f32>,
}

impl ScannerEngine {
    pub fn new(
        cfg: ScannerConfig,
        tuner: Arc<dyn ScannerTuner>,
        hub: Arc<Hub>,
        store: Arc<ScannerStore>,
        recordings_dir: PathBuf,
        start_ms: u64,
    ) -> anyhow::Result<Self> {
        let centers = build_slice_centers(&cfg.ranges, cfg.sample_rate_hz);
        anyhow::ensure!(!centers.is_empty(), "scanner ranges produced no sweep steps");
        let channels = store.enabled_channels()?;
        let lockouts = store.lockout_frequencies()?;
        let analyzer = SpectrumAnalyzer::new(cfg.fft_size)?;
        let recorder = VoxRecorder::new(recordings_dir, cfg.audio_rate_hz);

        let mut engine = Self {
            cursor: SweepCursor::new(centers, cfg.priority_interval),
            channels,
            lockouts,
            noise: NoiseFloors::new(),
            analyzer,
            recorder,
            state: EngineState::Scanning {
                dwell_started_ms: start_ms,
            },
            current_center_hz: 0,
            current_channel: None,
            last_fft_emit_ms: 0,
            fft_scratch: Vec::with_capacity(SCANNER_FFT_BINS),
            cfg,
            tuner,
            hub,
            store,
        };
        engine.advance_step(start_ms);
        engine.emit_state(start_ms);
        Ok(engine)
    }

    pub fn current_frequency(&self) -> u64 {
        self.current_center_hz
    }

    pub fn handle_cmd(&mut self, cmd: ScannerCmd, now: u64) {
        match cmd {
            ScannerCmd::Lock { frequency_hz } => self.lock(frequency_hz, now),
            ScannerCmd::Unlock => self.unlock(now),
            ScannerCmd::LockoutCurrent => self.lockout_current(now),
            ScannerCmd::RefreshStore => self.refresh_store_views(),
        }
    }

    pub fn process_frame(&mut self, frame: &IqFrame) {
        let now = frame.wall_ts_ms;
        let parked_bin = match &self.state {
            EngineState::Parked(p) => Some(p.bin),
            EngineState::Scanning { .. } => None,
        };

        let (detection, parked_level, floor) = {
            let fft = self.analyzer.analyze(frame);
            let floor = self.noise.update(self.current_center_hz, fft.noise_floor_db);
            let detection = detect_signal(fft, floor, self.cfg.threshold_db);
            let parked_level = parked_bin.map(|bin| level_at_bin(fft, bin));

            if now.saturating_sub(self.last_fft_emit_ms) >= SCANNER_FFT_INTERVAL_MS {
                self.last_fft_emit_ms = now;
                self.fft_scratch.clear();
                let stride = (fft.magnitudes_db.len() / SCANNER_FFT_BINS).max(1);
                for chunk in fft.magnitudes_db.chunks(stride) {
                    let max = chunk.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    self.fft_scratch.push(max);
                }
                self.fft_scratch.truncate(SCANNER_FFT_BINS);
                self.hub.broadcast_event(
                    ChannelKind::Main,
                    &Event::ScannerFft {
                        magnitudes_db: self.fft_scratch.clone(),
                    },
                );
            }
            (detection, parked_level, floor)
        };

        match &mut self.state {
            EngineState::Scanning { dwell_started_ms } => {
                let dwell_started = *dwell_started_ms;
                if let Some(det) = detection {
                    if is_locked(&self.lockouts, det.frequency_hz) {
                        // Locked-out carrier: let the dwell timer walk on.
                        if now.saturating_sub(dwell_started) >= self.cfg.dwell_ms {
                            self.advance_step(now);
                        }
                        return;
                    }
                    self.park(det, now);
                    return;
                }
                if now.saturating_sub(dwell_started) >= self.cfg.dwell_ms {
                    self.advance_step(now);
                }
            }
            EngineState::Parked(parked) => {
                let level = parked_level.unwrap_or(f32::NEG_INFINITY);
                if level > floor + self.cfg.threshold_db {
                    parked.last_signal_ms = now;
                }

                let audio: Vec<f32> = parked.ddc.process(frame).to_vec();
                self.recorder.append(&audio);
                if !audio.is_empty() {
                    self.hub.broadcast_binary(
                        ChannelKind::ScannerAudio,
                        Bytes::from(bytemuck::cast_slice::<f32, u8>(&audio).to_vec()),
                    );
                }
                self.hub.broadcast_event(
                    ChannelKind::ScannerAudio,
                    &Event::ScannerMeta {
                        state: ScanState::Parked,
                        frequency_hz: parked.frequency_hz,
                        signal_db: level,
                        noise_db: floor,
                        channel: parked.channel.as_ref().map(|c| c.label.clone()),
                    },
                );

                let periodic =
                    now.saturating_sub(parked.last_state_emit_ms) >= PARKED_STATE_INTERVAL_MS;
                if periodic {
                    parked.last_state_emit_ms = now;
                }
                let exit_cause =
                    if now.saturating_sub(parked.last_signal_ms) > self.cfg.squelch_timeout_ms {
                        Some("squelch_timeout")
                    } else if now.saturating_sub(parked.parked_at_ms) > self.cfg.max_park_ms {
                        Some("max_park")
                    } else {
                        None
                    };

                if let Some(cause) = exit_cause {
                    self.exit_park(now, cause);
                } else if periodic {
                    self.emit_state(now);
                }
            }
        }
    }

    /// External stop while parked still logs the hit and keeps the clip.
    pub fn shutdown(&mut self, now: u64) {
        if matches!(self.state, EngineState::Parked(_)) {
            self.exit_park(now, "stop");
        }
        self.hub.broadcast_event(
            ChannelKind::Main,
            &Event::ScannerState {
                status: ScannerStatus::idle(),
            },
        );
    }

    fn lock(&mut self, frequency_hz: u64, now: u64) {
        if matches!(self.state, EngineState::Parked(_)) {
            return;
        }
        if let Err(e) = self.tuner.set_frequency(frequency_hz) {
            tracing::warn!(error = ?e, frequency_hz, "manual lock tune failed");
            return;
        }
        self.current_center_hz = frequency_hz;
        self.current_channel = None;
        let floor = self.noise.get(frequency_hz).unwrap_or(-100.0);
        let det = Detection {
            frequency_hz,
            peak_bin: (self.cfg.fft_size / 2) as u32,
            peak_db: floor,
            noise_floor_db: floor,
        };
        self.park(det, now);
    }

    fn unlock(&mut self, now: u64) {
        if matches!(self.state, EngineState::Parked(_)) {
            self.exit_park(now, "manual_unlock");
        }
    }

    fn lockout_current(&mut self, now: u64) {
        let EngineState::Parked(parked) = &self.state else {
            return;
        };
        let frequency_hz = parked.frequency_hz;
        match self.store.add_lockout(frequency_hz, None) {
            Ok(_) => {
                tracing::info!(frequency_hz, "parked frequency locked out");
                self.refresh_store_views();
                self.exit_park(now, "lockout");
            }
            Err(e) => tracing::error!(error = %e, frequency_hz, "lockout insert failed"),
        }
    }

    fn refresh_store_views(&mut self) {
        match self.store.enabled_channels() {
            Ok(channels) => self.channels = channels,
            Err(e) => tracing::error!(error = %e, "channel reload failed"),
        }
        match self.store.lockout_frequencies() {
            Ok(lockouts) => self.lockouts = lockouts,
            Err(e) => tracing::error!(error = %e, "lockout reload failed"),
        }
    }

    fn park(&mut self, det: Detection, now: u64) {
        let channel = self
            .current_channel
            .clone()
            .filter(|c| c.frequency_hz.abs_diff(det.frequency_hz) <= CHANNEL_MATCH_HZ)
            .or_else(|| {
                self.channels
                    .iter()
                    .find(|c| c.frequency_hz.abs_diff(det.frequency_hz) <= CHANNEL_MATCH_HZ)
                    .cloned()
            });
        let mode = match channel.as_ref().map(|c| c.mode) {
            Some(ChannelMode::Am) => DemodMode::Am,
            _ => DemodMode::Nfm,
        };
        let spec = ReceiverSpec {
            id: "scanner".to_string(),
            center_freq_hz: det.frequency_hz,
            bandwidth_hz: PARK_BANDWIDTH_HZ,
            output_rate_hz: self.cfg.audio_rate_hz,
            mode,
            decoder: None,
        };
        let ddc = match VirtualReceiver::new(
            spec,
            self.current_center_hz,
            self.cfg.sample_rate_hz,
            75.0,
        ) {
            Ok(ddc) => ddc,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    frequency_hz = det.frequency_hz,
                    "detection at band edge; skipping park"
                );
                return;
            }
        };

        tracing::info!(
            frequency_hz = det.frequency_hz,
            peak_db = det.peak_db,
            noise_db = det.noise_floor_db,
            channel = channel.as_ref().map(|c| c.label.as_str()),
            "signal detected; parking"
        );
        self.recorder.start();
        self.state = EngineState::Parked(Box::new(Parked {
            frequency_hz: det.frequency_hz,
            bin: det.peak_bin,
            channel,
            parked_at_ms: now,
            last_signal_ms: now,
            last_state_emit_ms: now,
            peak_db: det.peak_db,
            ddc,
        }));
        self.emit_state(now);
    }

    fn exit_park(&mut self, now: u64, cause: &'static str) {
        let EngineState::Parked(parked) =
            std::mem::replace(&mut self.state, EngineState::Scanning { dwell_started_ms: now })
        else {
            return;
        };
        let duration_ms = now.saturating_sub(parked.parked_at_ms) as u32;
        let channel_id = parked.channel.as_ref().map(|c| c.id);
        tracing::info!(
            frequency_hz = parked.frequency_hz,
            duration_ms,
            cause,
            "leaving parked frequency"
        );

        let hit_id = match self.store.insert_hit(
            now,
            parked.frequency_hz,
            parked.peak_db,
            duration_ms,
            channel_id,
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, "hit insert failed");
                None
            }
        };

        let clip = match self.recorder.finalize(
            chrono::Local::now(),
            parked.frequency_hz,
            parked.channel.as_ref().map(|c| c.label.as_str()),
        ) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %e, "vox clip write failed");
                None
            }
        };
        let clip_str = clip.as_ref().map(|p| p.display().to_string());
        if let (Some(id), Some(path)) = (hit_id, clip_str.as_deref()) {
            if let Err(e) = self.store.set_hit_clip(id, path) {
                tracing::error!(error = %e, "hit clip update failed");
            }
        }

        self.hub.broadcast_event(
            ChannelKind::Main,
            &Event::ScannerHit {
                hit: skywave_core::protocol::HitRecord {
                    id: hit_id.unwrap_or(0),
                    wall_ts_ms: now,
                    frequency_hz: parked.frequency_hz,
                    strength_db: parked.peak_db,
                    duration_ms,
                    channel_id,
                    audio_clip_path: clip_str,
                },
            },
        );

        self.advance_step(now);
        self.emit_state(now);
    }

    fn advance_step(&mut self, now: u64) {
        let Some(step) = self.cursor.next(&self.channels) else {
            return;
        };
        let center = step.center_hz();
        self.current_channel = match step {
            SweepStep::Priority { channel } => Some(channel),
            SweepStep::Slice { .. } => None,
        };
        if center != self.current_center_hz {
            if let Err(e) = self.tuner.set_frequency(center) {
                tracing::warn!(error = ?e, center, "sweep retune failed");
            }
            self.current_center_hz = center;
        }
        if let EngineState::Scanning { dwell_started_ms } = &mut self.state {
            *dwell_started_ms = now;
        }
    }

    pub fn status(&self, now: u64) -> ScannerStatus {
        match &self.state {
            EngineState::Scanning { .. } => ScannerStatus {
                state: ScanState::Scanning,
                frequency_hz: Some(self.current_center_hz),
                signal_db: None,
                noise_db: self.noise.get(self.current_center_hz),
                channel: self.current_channel.as_ref().map(|c| c.label.clone()),
                sweep_step: self.cursor.position(),
                sweep_steps: self.cursor.total_steps(),
                parked_ms: None,
            },
            EngineState::Parked(parked) => ScannerStatus {
                state: ScanState::Parked,
                frequency_hz: Some(parked.frequency_hz),
                signal_db: Some(parked.peak_db),
                noise_db: self.noise.get(self.current_center_hz),
                channel: parked.channel.as_ref().map(|c| c.label.clone()),
                sweep_step: self.cursor.position(),
                sweep_steps: self.cursor.total_steps(),
                parked_ms: Some(now.saturating_sub(parked.parked_at_ms)),
            },
        }
    }

    pub fn is_parked(&self) -> bool {
        matches!(self.state, EngineState::Parked(_))
    }

    fn emit_state(&self, now: u64) {
        self.hub.broadcast_event(
            ChannelKind::Main,
            &Event::ScannerState {
                status: self.status(now),
            },
        );
    }
}

/// Public face of the scanner: owns the worker thread, the command
/// channel, and the shared status snapshot. Mutually exclusive with the
/// multiplexer over the device; the control surface enforces the handover.
pub struct Scanner {
    base_cfg: ScannerConfig,
    sdr: Sdr,
    recordings_dir: PathBuf,
    hub: Arc<Hub>,
    store: Arc<ScannerStore>,
    running: AtomicBool,
    stop: Mutex<Option<Arc<AtomicBool>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    cmd_tx: Mutex<Option<Sender<ScannerCmd>>>,
    client: Mutex<Option<Arc<RtlTcpClient>>>,
    status: Mutex<ScannerStatus>,
}

impl Scanner {
    pub fn new(
        base_cfg: ScannerConfig,
        sdr: Sdr,
        recordings_dir: PathBuf,
        hub: Arc<Hub>,
        store: Arc<ScannerStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base_cfg,
            sdr,
            recordings_dir,
            hub,
            store,
            running: AtomicBool::new(false),
            stop: Mutex::new(None),
            worker: Mutex::new(None),
            cmd_tx: Mutex::new(None),
            client: Mutex::new(None),
            status: Mutex::new(ScannerStatus::idle()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ScannerStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn start(self: &Arc<Self>, opts: Option<ScannerConfig>) -> Result<(), ControlError> {
        let cfg = opts.unwrap_or_else(|| self.base_cfg.clone());
        validate_scanner(&cfg).map_err(|e| ControlError::Validation(e.to_string()))?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        *self.stop.lock().unwrap_or_else(|p| p.into_inner()) = Some(stop.clone());
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        *self.cmd_tx.lock().unwrap_or_else(|p| p.into_inner()) = Some(cmd_tx);
        let scanner = self.clone();
        let handle = std::thread::Builder::new()
            .name("scanner-worker".to_string())
            .spawn(move || run_worker(scanner, cfg, stop, cmd_rx))
            .expect("spawn scanner worker thread");
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

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
        *self.cmd_tx.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.running.store(false, Ordering::SeqCst);
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = ScannerStatus::idle();
    }

    pub fn send_cmd(&self, cmd: ScannerCmd) -> Result<(), ControlError> {
        let guard = self.cmd_tx.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(tx) => tx
                .send(cmd)
                .map_err(|_| ControlError::Validation("scanner is shutting down".into())),
            None => Err(ControlError::Validation("scanner is not running".into())),
        }
    }

    /// Validated against the latest snapshot; the engine re-checks on
    /// delivery and ignores the command if the park ended in between.
    pub fn lockout_current(&self) -> Result<(), ControlError> {
        if self.status().state != ScanState::Parked {
            return Err(ControlError::NotParked);
        }
        self.send_cmd(ScannerCmd::LockoutCurrent)
    }

    pub fn set_gain(&self, db: f32) -> Result<(), ControlError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        match client {
            Some(client) => client
                .set_gain(db)
                .map_err(|e| ControlError::Validation(format!("device command failed: {e}"))),
            None => Err(ControlError::Validation("scanner has no device".into())),
        }
    }
}

fn run_worker(
    scanner: Arc<Scanner>,
    cfg: ScannerConfig,
    stop: Arc<AtomicBool>,
    cmd_rx: std::sync::mpsc::Receiver<ScannerCmd>,
) {
    let centers = build_slice_centers(&cfg.ranges, cfg.sample_rate_hz);
    let first_center = centers.first().copied().unwrap_or(cfg.ranges[0].start_hz);

    let rtl_cfg = RtlTcpConfig {
        host: scanner.sdr.host.clone(),
        port: scanner.sdr.port,
        frequency_hz: first_center,
        sample_rate_hz: cfg.sample_rate_hz,
        gain_db: Some(cfg.gain_db),
        connect_timeout: Duration::from_millis(scanner.sdr.connect_timeout_ms),
        frame_samples: scanner.sdr.frame_samples,
    };
    let client = match RtlTcpClient::connect(&rtl_cfg) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "scanner connect failed");
            scanner.hub.broadcast_event(
                ChannelKind::Main,
                &Event::SdrDisconnected {
                    cause: e.kind_name().to_string(),
                },
            );
            scanner.running.store(false, Ordering::SeqCst);
            return;
        }
    };
    *scanner.client.lock().unwrap_or_else(|p| p.into_inner()) = Some(client.clone());
    scanner.hub.broadcast_event(
        ChannelKind::Main,
        &Event::SdrConnected {
            tuner: client.tuner.to_string(),
            gain_count: client.gain_count,
        },
    );

    let mut engine = match ScannerEngine::new(
        cfg,
        client.clone(),
        scanner.hub.clone(),
        scanner.store.clone(),
        scanner.recordings_dir.clone(),
        now_ms(),
    ) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "scanner engine init failed");
            client.disconnect();
            scanner.running.store(false, Ordering::SeqCst);
            return;
        }
    };

    let (frames_tx, frames_rx) = sync_channel(8);
    let reader = spawn_reader(client.clone(), frames_tx, stop.clone());

    loop {
        if stop.load(Ordering::Relaxed) {
            client.disconnect();
        }
        while let Ok(cmd) = cmd_rx.try_recv() {
            engine.handle_cmd(cmd, now_ms());
        }
        match frames_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(frame) => {
                engine.process_frame(&frame);
                *scanner.status.lock().unwrap_or_else(|p| p.into_inner()) =
                    engine.status(frame.wall_ts_ms);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    engine.shutdown(now_ms());
    let cause = reader.join().unwrap_or("io_error");
    *scanner.client.lock().unwrap_or_else(|p| p.into_inner()) = None;
    scanner.hub.broadcast_event(
        ChannelKind::Main,
        &Event::SdrDisconnected {
            cause: cause.to_string(),
        },
    );
    *scanner.status.lock().unwrap_or_else(|p| p.into_inner()) = ScannerStatus::idle();
    scanner.running.store(false, Ordering::SeqCst);
}
