//! OtterTune Agent Core Module
//!
//! This module contains the shared pieces of the agent, including:
//! - The agent-wide error type
//! - Observation payload types shipped to the ingestion service
//! - The process-wide error queue drained by the health heartbeat

pub mod error;
pub mod error_queue;
pub mod payload;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Version of the agent reported in headers and health payloads
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
