//! Live spectrum bar visualizer fed by an external analyzer process.

pub mod analyzer;
pub mod config;
pub mod encode;
pub mod error;
pub mod render;
pub mod spectrum;
pub mod visualizer;

#[cfg(all(test, unix))]
mod testutil;

pub use error::{BinCountMismatch, DecodeError, VisualizerError};
pub use visualizer::{StopReport, TickOutcome, Visualizer, VisualizerSettings, VisualizerState};
