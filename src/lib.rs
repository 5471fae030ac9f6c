//! sortstash - cached spike sorting pipeline
//!
//! Preprocesses raw electrophysiology recordings, sorts them and computes
//! spike amplitudes. Every stage stores its result in a crash-safe
//! compute-or-load cache keyed by the recording name and the configuration
//! that produced it.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod postprocessing;
pub mod probe;
pub mod recording;
pub mod sorting;
pub mod ui;

pub use error::{StashError, StashResult};
