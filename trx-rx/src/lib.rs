//! trx Receiver Library
//!
//! Exposes the receiver's modules for integration testing.

pub mod args;
pub mod playout;

pub use args::{Args, RxConfig};
pub use playout::{PlayoutConfig, PlayoutDriver, PlayoutState, PlayoutStats};
