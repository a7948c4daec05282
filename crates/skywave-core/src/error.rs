use thiserror::Error;

#[derive(Debug, Error)]
pub enum DspError {
    #[error("fft size {0} is not a power of two")]
    InvalidFftSize(usize),
    #[error("fir length {0} must be odd and >= 3")]
    InvalidFirLength(usize),
    #[error("normalized cutoff {0} must be in (0, 0.5]")]
    InvalidCutoff(f64),
}

/// Connection-level failures of the rtl_tcp transport. Fatal for the
/// affected connection only; the owning component decides whether to retry.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection refused")]
    Refused,
    #[error("connection timed out")]
    Timeout,
    #[error("handshake failed: {0}")]
    HandshakeFail(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Wire name carried in `sdr_disconnected` events and command results.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Refused => "CONNECT_REFUSED",
            Self::Timeout => "TIMEOUT",
            Self::HandshakeFail(_) => "HANDSHAKE_FAIL",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Failures of control-surface commands. Returned to the caller; no state
/// is mutated on the error path.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    Validation(String),
    #[error("device is owned by {0}")]
    DeviceBusy(&'static str),
    #[error("receiver does not fit within the tuned band")]
    ReceiverOutOfBand,
    #[error("no such {0}")]
    NotFound(&'static str),
    #[error("scanner is not parked")]
    NotParked,
    #[error("storage error: {0}")]
    Storage(String),
}

impl ControlError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::DeviceBusy(_) => "DEVICE_BUSY",
            Self::ReceiverOutOfBand => "RECEIVER_OUT_OF_BAND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotParked => "NOT_PARKED",
            Self::Storage(_) => "STORAGE",
        }
    }
}
