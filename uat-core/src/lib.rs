//! uat-core: 978 MHz UAT demodulation and decoding.
//!
//! No async, no I/O — just the signal-to-message pipeline: I/Q sample
//! conversion, sync-word search and bit slicing, Reed-Solomon error
//! correction, and the DO-282B payload decoder. This crate is the shared
//! core under `uat-decoder` and anything else that wants UAT frames.

pub mod convert;
pub mod decode;
pub mod demod;
pub mod dispatch;
pub mod fec;
pub mod stratux;
pub mod track;
pub mod types;
pub mod wire;

// Re-export the commonly used entry points at the crate root
pub use convert::{SampleConverter, SampleFormat};
pub use decode::AdsbRecord;
pub use demod::{Demodulator, Receiver};
pub use dispatch::MessageDispatch;
pub use stratux::StratuxParser;
pub use track::Tracker;
pub use types::*;
