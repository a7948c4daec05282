use crate::fanout::{ChannelKind, Hub};
use bytes::Bytes;
use skywave_core::frame::FftFrame;
use skywave_core::protocol::Event;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Accumulates FFT magnitude payloads and flushes them as one binary batch
/// at display cadence. The flush check runs on every arriving frame, not
/// on a timer, so the batch boundary never suffers scheduler jitter.
///
/// Batch wire format: `[count: u32 LE]` followed by `count` payloads of
/// `fft_size * 4` bytes of f32 LE magnitudes, already FFT-shifted.
pub struct SpectrumBatcher {
    hub: Arc<Hub>,
    flush_interval: Duration,
    meta_interval: Duration,
    payloads: Vec<Bytes>,
    pending_bytes: usize,
    last_flush: Instant,
    last_meta: Option<Instant>,
}

impl SpectrumBatcher {
    pub fn new(hub: Arc<Hub>, flush_interval_ms: u64, meta_interval_ms: u64) -> Self {
        Self {
            hub,
            flush_interval: Duration::from_millis(flush_interval_ms),
            meta_interval: Duration::from_millis(meta_interval_ms),
            payloads: Vec::new(),
            pending_bytes: 0,
            last_flush: Instant::now(),
            last_meta: None,
        }
    }

    pub fn push(&mut self, frame: &FftFrame) {
        let payload = Bytes::from(bytemuck::cast_slice::<f32, u8>(&frame.magnitudes_db).to_vec());
        self.pending_bytes += payload.len();
        self.payloads.push(payload);

        let meta_due = match self.last_meta {
            None => true,
            Some(at) => at.elapsed() >= self.meta_interval,
        };
        if meta_due {
            self.last_meta = Some(Instant::now());
            self.hub.broadcast_event(
                ChannelKind::Main,
                &Event::FftMeta {
                    center_freq_hz: frame.center_freq_hz,
                    sample_rate_hz: frame.sample_rate_hz,
                    fft_size: frame.fft_size,
                },
            );
        }

        if self.last_flush.elapsed() >= self.flush_interval {
            self.flush();
        }
    }

    /// Emits whatever is queued. Called on shutdown so the tail batch is
    /// not lost.
    pub fn flush(&mut self) {
        self.last_flush = Instant::now();
        if self.payloads.is_empty() {
            return;
        }
        let mut batch = Vec::with_capacity(4 + self.pending_bytes);
        batch.extend_from_slice(&(self.payloads.len() as u32).to_le_bytes());
        for payload in self.payloads.drain(..) {
            batch.extend_from_slice(&payload);
        }
        self.pending_bytes = 0;
        self.hub.broadcast_binary(ChannelKind::Signal, Bytes::from(batch));
    }
}
