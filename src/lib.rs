//! Simulated live traffic capture with a hex / ASCII / binary payload inspector.
//!
//! A [`CaptureSession`] ticks a [`TrafficGenerator`] into a bounded
//! [`CaptureStore`]; the display layer reads [`SessionView`] snapshots and
//! renders the selected payload with [`decode_rows`] or [`HexDump`].

pub mod analysis;
pub mod config;
pub mod decoder;
pub mod error;
pub mod export;
pub mod generator;
pub mod packet;
pub mod session;
pub mod store;

pub use analysis::{Analyzer, CredentialGate, PortProfileAnalyzer};
pub use config::SessionConfig;
pub use decoder::{HexDump, Row, decode_rows};
pub use error::{AnalysisError, ConfigError, Error, Result};
pub use export::ExportFormat;
pub use generator::TrafficGenerator;
pub use packet::{Packet, Protocol};
pub use session::{AnalysisState, CaptureSession, CaptureState, SessionEvent, SessionView};
pub use store::{CaptureStore, StoreStats};
