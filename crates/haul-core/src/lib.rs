//! Core types for haul.
//!
//! This crate provides the values shared by the file-operation engine and
//! its front ends: the engine configuration, the error taxonomy and the
//! scan/transfer counters.

mod config;
mod error;
mod info;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::OpError;
pub use info::{Position, SourceInfo, TransferInfo};
