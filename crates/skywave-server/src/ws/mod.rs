pub mod events;
pub mod scanner_audio;
pub mod signal;
