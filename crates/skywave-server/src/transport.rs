use skywave_core::{error::ConnectionError, frame::IqFrame, util::now_ms};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// rtl_tcp tuner ids as sent in the opening handshake.
pub fn tuner_name(tuner_id: u32) -> &'static str {
    match tuner_id {
        1 => "E4000",
        2 => "FC0012",
        3 => "FC0013",
        4 => "FC2580",
        5 => "R820T",
        6 => "R828D",
        _ => "UNKNOWN",
    }
}

/// 5-byte rtl_tcp control packets: opcode + big-endian value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerCommand {
    Frequency(u32),
    SampleRate(u32),
    /// false = hardware AGC, true = manual gain.
    GainMode(bool),
    /// Tenths of a dB.
    TunerGain(u32),
    FreqCorrection(i32),
    IfGain(u32),
    AgcMode(bool),
    DirectSampling(u32),
    OffsetTuning(bool),
    BiasTee(bool),
}

impl TunerCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Frequency(_) => 0x01,
            Self::SampleRate(_) => 0x02,
            Self::GainMode(_) => 0x03,
            Self::TunerGain(_) => 0x04,
            Self::FreqCorrection(_) => 0x05,
            Self::IfGain(_) => 0x06,
            Self::AgcMode(_) => 0x08,
            Self::DirectSampling(_) => 0x09,
            Self::OffsetTuning(_) => 0x0a,
            Self::BiasTee(_) => 0x0e,
        }
    }

    pub fn value(&self) -> u32 {
        match *self {
            Self::Frequency(v)
            | Self::SampleRate(v)
            | Self::TunerGain(v)
            | Self::IfGain(v)
            | Self::DirectSampling(v) => v,
            Self::FreqCorrection(v) => v as u32,
            Self::GainMode(on) | Self::AgcMode(on) | Self::OffsetTuning(on) | Self::BiasTee(on) => {
                u32::from(on)
            }
        }
    }

    pub fn encode(&self) -> [u8; 5] {
        let mut pkt = [0u8; 5];
        pkt[0] = self.opcode();
        pkt[1..5].copy_from_slice(&self.value().to_be_bytes());
        pkt
    }
}

#[derive(Debug, Clone)]
pub struct RtlTcpConfig {
    pub host: String,
    pub port: u16,
    pub frequency_hz: u64,
    pub sample_rate_hz: u32,
    pub gain_db: Option<f32>,
    pub connect_timeout: Duration,
    pub frame_samples: usize,
}

#[derive(Debug, Clone)]
pub struct AppliedConfig {
    pub frequency_hz: u64,
    pub sample_rate_hz: u32,
    pub gain_db: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ConnectDescriptor {
    pub tuner: &'static str,
    pub gain_count: u32,
    pub applied: AppliedConfig,
}

// Normalization per the rtl_tcp stream contract: u8 -> (u8 - 127.5)/127.5.
// Precomputed so the reader's hot loop is a table walk.
static U8_TO_F32: [f32; 256] = {
    let mut lut = [0.0f32; 256];
    let mut i = 0usize;
    while i < 256 {
        lut[i] = (i as f32 - 127.5) / 127.5;
        i += 1;
    }
    lut
};

/// Client side of an rtl_tcp server. Owns the socket; every writer goes
/// through the serialized command path. At most one reader thread per
/// client delivers IQ frames to a single downstream consumer.
#[derive(Debug)]
pub struct RtlTcpClient {
    reader: Mutex<Option<TcpStream>>,
    writer: Mutex<TcpStream>,
    pub tuner: &'static str,
    pub gain_count: u32,
    applied: Mutex<AppliedConfig>,
    center_hz: AtomicU64,
    rate_hz: AtomicU32,
    frame_samples: usize,
    disconnect_emitted: AtomicBool,
}

impl RtlTcpClient {
    /// Connects, completes the 12-byte `RTL0` handshake, and applies the
    /// initial sample rate / frequency / gain. Total budget is
    /// `cfg.connect_timeout` (10 s by default).
    pub fn connect(cfg: &RtlTcpConfig) -> Result<Self, ConnectionError> {
        let deadline = Instant::now() + cfg.connect_timeout;
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let mut last_err: Option<ConnectionError> = None;
        let addrs = addr
            .to_socket_addrs()
            .map_err(|e| ConnectionError::HandshakeFail(format!("resolve {addr}: {e}")))?;

        let mut stream = None;
        for candidate in addrs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(last_err.unwrap_or(ConnectionError::Timeout));
            }
            match TcpStream::connect_timeout(&candidate, remaining) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(classify_connect_error(e)),
            }
        }
        let stream = stream.ok_or_else(|| last_err.unwrap_or(ConnectionError::Refused))?;
        stream.set_nodelay(true).ok();

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ConnectionError::Timeout);
        }
        stream.set_read_timeout(Some(remaining))?;

        let mut hello = [0u8; 12];
        let mut reader = stream
            .try_clone()
            .map_err(ConnectionError::Io)?;
        if let Err(e) = reader.read_exact(&mut hello) {
            return Err(match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                    ConnectionError::Timeout
                }
                std::io::ErrorKind::UnexpectedEof => {
                    ConnectionError::HandshakeFail("short greeting".to_string())
                }
                _ => ConnectionError::Io(e),
            });
        }
        if &hello[0..4] != b"RTL0" {
            return Err(ConnectionError::HandshakeFail(format!(
                "bad magic {:02x?}",
                &hello[0..4]
            )));
        }
        let tuner_id = u32::from_be_bytes([hello[4], hello[5], hello[6], hello[7]]);
        let gain_count = u32::from_be_bytes([hello[8], hello[9], hello[10], hello[11]]);

        // Reads during streaming use a short poll timeout so the reader
        // thread can notice stop requests between chunks.
        reader.set_read_timeout(Some(Duration::from_millis(250)))?;

        let client = Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(stream),
            tuner: tuner_name(tuner_id),
            gain_count,
            applied: Mutex::new(AppliedConfig {
                frequency_hz: cfg.frequency_hz,
                sample_rate_hz: cfg.sample_rate_hz,
                gain_db: cfg.gain_db,
            }),
            center_hz: AtomicU64::new(cfg.frequency_hz),
            rate_hz: AtomicU32::new(cfg.sample_rate_hz),
            frame_samples: cfg.frame_samples,
            disconnect_emitted: AtomicBool::new(false),
        };

        client.send(TunerCommand::SampleRate(cfg.sample_rate_hz))?;
        client.send(TunerCommand::Frequency(cfg.frequency_hz as u32))?;
        match cfg.gain_db {
            Some(db) => {
                client.send(TunerCommand::GainMode(true))?;
                client.send(TunerCommand::TunerGain(gain_tenths(db)))?;
            }
            None => {
                client.send(TunerCommand::GainMode(false))?;
                client.send(TunerCommand::AgcMode(true))?;
            }
        }

        tracing::info!(
            tuner = client.tuner,
            gain_count,
            frequency_hz = cfg.frequency_hz,
            sample_rate_hz = cfg.sample_rate_hz,
            "rtl_tcp connected"
        );
        Ok(client)
    }

    pub fn descriptor(&self) -> ConnectDescriptor {
        ConnectDescriptor {
            tuner: self.tuner,
            gain_count: self.gain_count,
            applied: self.applied_config(),
        }
    }

    pub fn applied_config(&self) -> AppliedConfig {
        self.applied
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn send(&self, cmd: TunerCommand) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        writer.write_all(&cmd.encode())
    }

    pub fn set_frequency(&self, hz: u64) -> std::io::Result<()> {
        self.send(TunerCommand::Frequency(hz as u32))?;
        self.center_hz.store(hz, Ordering::Relaxed);
        self.applied
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .frequency_hz = hz;
        Ok(())
    }

    pub fn set_sample_rate(&self, hz: u32) -> std::io::Result<()> {
        self.send(TunerCommand::SampleRate(hz))?;
        self.rate_hz.store(hz, Ordering::Relaxed);
        self.applied
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .sample_rate_hz = hz;
        Ok(())
    }

    /// Forces manual gain mode, then applies the gain in tenths of a dB.
    pub fn set_gain(&self, db: f32) -> std::io::Result<()> {
        self.send(TunerCommand::GainMode(true))?;
        self.send(TunerCommand::TunerGain(gain_tenths(db)))?;
        self.applied
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .gain_db = Some(db);
        Ok(())
    }

    pub fn set_agc(&self, enabled: bool) -> std::io::Result<()> {
        self.send(TunerCommand::GainMode(!enabled))?;
        self.send(TunerCommand::AgcMode(enabled))?;
        if enabled {
            self.applied
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .gain_db = None;
        }
        Ok(())
    }

    pub fn center_freq_hz(&self) -> u64 {
        self.center_hz.load(Ordering::Relaxed)
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.rate_hz.load(Ordering::Relaxed)
    }

    /// Closes the socket. The reader thread (if any) exits on the next
    /// read and reports the disconnect exactly once.
    pub fn disconnect(&self) {
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.shutdown(std::net::Shutdown::Both);
        }
    }

    fn take_disconnect_slot(&self) -> bool {
        !self.disconnect_emitted.swap(true, Ordering::SeqCst)
    }
}

fn gain_tenths(db: f32) -> u32 {
    (db * 10.0).round().max(0.0) as u32
}

fn classify_connect_error(e: std::io::Error) -> ConnectionError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => ConnectionError::Refused,
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ConnectionError::Timeout,
        _ => ConnectionError::Io(e),
    }
}

/// Spawns the reader thread. Whole chunks of `frame_samples` complex
/// samples are normalized and sent downstream; the thread exits on stop
/// request, consumer hang-up, or I/O error, returning the cause exactly
/// once. Dropping the sender is what tells the consumer the stream ended.
pub fn spawn_reader(
    client: Arc<RtlTcpClient>,
    frames_tx: SyncSender<Arc<IqFrame>>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<&'static str> {
    std::thread::Builder::new()
        .name("rtltcp-reader".to_string())
        .spawn(move || run_reader(client, frames_tx, stop))
        .expect("spawn rtltcp reader thread")
}

fn run_reader(
    client: Arc<RtlTcpClient>,
    frames_tx: SyncSender<Arc<IqFrame>>,
    stop: Arc<AtomicBool>,
) -> &'static str {
    let mut stream = match client.reader.lock().unwrap_or_else(|p| p.into_inner()).take() {
        Some(s) => s,
        None => return "already_streaming",
    };

    let frame_bytes = client.frame_samples * 2;
    let mut raw = vec![0u8; frame_bytes];
    let mut filled = 0usize;
    let mut seq = 0u64;

    let cause = loop {
        if stop.load(Ordering::Relaxed) {
            break "stopped";
        }
        match stream.read(&mut raw[filled..]) {
            Ok(0) => break "eof",
            Ok(n) => {
                filled += n;
                if filled < frame_bytes {
                    continue;
                }
                filled = 0;

                let mut samples = Vec::with_capacity(frame_bytes);
                for &b in raw.iter() {
                    samples.push(U8_TO_F32[b as usize]);
                }
                let frame = Arc::new(IqFrame {
                    samples,
                    sample_rate_hz: client.sample_rate_hz(),
                    center_freq_hz: client.center_freq_hz(),
                    seq,
                    wall_ts_ms: now_ms(),
                });
                seq += 1;
                if frames_tx.send(frame).is_err() {
                    break "consumer_gone";
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                tracing::debug!(error = ?e, "rtl_tcp stream read failed");
                break "io_error";
            }
        }
    };

    if client.take_disconnect_slot() {
        tracing::info!(cause, frames = seq, "rtl_tcp disconnected");
    }
    cause
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_frame_as_opcode_plus_big_endian_value() {
        assert_eq!(
            TunerCommand::Frequency(144_800_000).encode(),
            [0x01, 0x08, 0xA2, 0xD3, 0x40]
        );
        assert_eq!(
            TunerCommand::SampleRate(2_048_000).encode(),
            [0x02, 0x00, 0x1F, 0x40, 0x00]
        );
        assert_eq!(TunerCommand::GainMode(true).encode(), [0x03, 0, 0, 0, 1]);
        assert_eq!(TunerCommand::TunerGain(400).encode(), [0x04, 0, 0, 0x01, 0x90]);
        assert_eq!(
            TunerCommand::FreqCorrection(-2).encode(),
            [0x05, 0xFF, 0xFF, 0xFF, 0xFE]
        );
        assert_eq!(TunerCommand::IfGain(120).encode(), [0x06, 0, 0, 0, 120]);
        assert_eq!(TunerCommand::AgcMode(true).encode(), [0x08, 0, 0, 0, 1]);
        assert_eq!(TunerCommand::DirectSampling(2).encode(), [0x09, 0, 0, 0, 2]);
        assert_eq!(TunerCommand::OffsetTuning(true).encode(), [0x0a, 0, 0, 0, 1]);
        assert_eq!(TunerCommand::BiasTee(false).encode(), [0x0e, 0, 0, 0, 0]);
    }

    #[test]
    fn normalization_stays_within_the_contract() {
        let limit = (255.0 - 127.5) / 127.5;
        for b in 0..=255usize {
            assert!(U8_TO_F32[b].abs() <= limit + 1e-6);
        }
        assert!(U8_TO_F32[0] < -0.99);
        assert!(U8_TO_F32[255] > 0.99);
        // 127/128 straddle zero symmetrically.
        assert!((U8_TO_F32[127] + U8_TO_F32[128]).abs() < 1e-6);
    }

    #[test]
    fn tuner_ids_map_to_names() {
        assert_eq!(tuner_name(5), "R820T");
        assert_eq!(tuner_name(1), "E4000");
        assert_eq!(tuner_name(99), "UNKNOWN");
    }

    #[test]
    fn gain_is_sent_in_tenths() {
        assert_eq!(gain_tenths(40.0), 400);
        assert_eq!(gain_tenths(33.8), 338);
        assert_eq!(gain_tenths(-1.0), 0);
    }

    fn test_config(port: u16) -> RtlTcpConfig {
        RtlTcpConfig {
            host: "127.0.0.1".to_string(),
            port,
            frequency_hz: 446_050_000,
            sample_rate_hz: 2_048_000,
            gain_db: Some(40.0),
            connect_timeout: Duration::from_millis(2000),
            frame_samples: 256,
        }
    }

    /// Minimal rtl_tcp peer: completes the handshake, captures command
    /// packets, then streams `stream_bytes` of IQ.
    fn spawn_server(
        greeting: Vec<u8>,
        stream_bytes: usize,
    ) -> (u16, std::thread::JoinHandle<Vec<u8>>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(&greeting).unwrap();

            // Initial config: sample rate, frequency, gain mode, gain.
            let mut cmds = vec![0u8; 20];
            sock.read_exact(&mut cmds).unwrap();

            if stream_bytes > 0 {
                let data: Vec<u8> = (0..stream_bytes).map(|n| (n % 256) as u8).collect();
                sock.write_all(&data).unwrap();
            }

            // One more command is expected before the peer goes away.
            let mut extra = [0u8; 5];
            if sock.read_exact(&mut extra).is_ok() {
                cmds.extend_from_slice(&extra);
            }
            cmds
        });
        (port, handle)
    }

    fn rtl0_greeting(tuner_id: u32, gains: u32) -> Vec<u8> {
        let mut g = b"RTL0".to_vec();
        g.extend_from_slice(&tuner_id.to_be_bytes());
        g.extend_from_slice(&gains.to_be_bytes());
        g
    }

    #[test]
    fn handshake_reports_tuner_and_gain_count() {
        let (port, server) = spawn_server(rtl0_greeting(5, 29), 1024);
        let client = RtlTcpClient::connect(&test_config(port)).unwrap();
        assert_eq!(client.tuner, "R820T");
        assert_eq!(client.gain_count, 29);
        let desc = client.descriptor();
        assert_eq!(desc.applied.frequency_hz, 446_050_000);
        assert_eq!(desc.applied.gain_db, Some(40.0));

        client.set_frequency(144_800_000).unwrap();
        drop(client);
        let cmds = server.join().unwrap();
        assert_eq!(&cmds[0..5], &[0x02, 0x00, 0x1F, 0x40, 0x00]);
        assert_eq!(&cmds[5..10], &[0x01, 0x1A, 0x96, 0x2E, 0xD0]);
        assert_eq!(&cmds[10..15], &[0x03, 0, 0, 0, 1]);
        assert_eq!(&cmds[15..20], &[0x04, 0, 0, 0x01, 0x90]);
        // The post-handshake retune, big-endian 144.8 MHz.
        assert_eq!(&cmds[20..25], &[0x01, 0x08, 0xA2, 0xD3, 0x40]);
    }

    #[test]
    fn reader_emits_whole_normalized_frames() {
        let (port, _server) = spawn_server(rtl0_greeting(1, 10), 2048);
        let client = Arc::new(RtlTcpClient::connect(&test_config(port)).unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::sync_channel(8);
        let reader = spawn_reader(client.clone(), tx, stop.clone());

        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.samples.len(), 512);
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.center_freq_hz, 446_050_000);
        assert!((frame.samples[0] - (0.0 - 127.5) / 127.5).abs() < 1e-6);
        assert!((frame.samples[200] - (200.0 - 127.5) / 127.5).abs() < 1e-6);

        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.seq, 1);

        stop.store(true, Ordering::SeqCst);
        client.disconnect();
        let cause = reader.join().unwrap();
        assert!(cause == "stopped" || cause == "eof" || cause == "io_error");
    }

    #[test]
    fn bad_magic_fails_the_handshake() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"HTTP/1.1 400\r\n").unwrap();
        });
        let err = RtlTcpClient::connect(&test_config(port)).unwrap_err();
        assert_eq!(err.kind_name(), "HANDSHAKE_FAIL");
        server.join().unwrap();
    }

    #[test]
    fn silent_server_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut cfg = test_config(port);
        cfg.connect_timeout = Duration::from_millis(200);
        let err = RtlTcpClient::connect(&cfg).unwrap_err();
        assert_eq!(err.kind_name(), "TIMEOUT");
        drop(listener);
    }

    #[test]
    fn refused_connection_is_classified() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = RtlTcpClient::connect(&test_config(port)).unwrap_err();
        assert!(
            matches!(err, ConnectionError::Refused | ConnectionError::Io(_)),
            "{err:?}"
        );
    }
}
