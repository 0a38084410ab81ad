//! trx Transmitter Library
//!
//! Exposes the transmitter's modules for integration testing.

pub mod args;
pub mod ptt;
pub mod transmit;

pub use args::{Args, TxConfig};
pub use ptt::{PttConfig, PttHandle, PttInput, PttMonitor, PttState};
pub use transmit::{EdgeDetector, MutePolicy, TransmitConfig, TransmitPath, TransmitStats};
