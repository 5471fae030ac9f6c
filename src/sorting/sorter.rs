//! Sorter abstraction
//!
//! Provides a trait for spike sorters so the pipeline can run either the
//! built-in threshold detector or an external sorting command.

use super::external::ExternalSorter;
use super::threshold::ThresholdSorter;
use super::{SorterParams, Sorting};
use crate::config::schema::{SorterBackend, SorterConfig};
use crate::error::{StashError, StashResult};
use crate::recording::Recording;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Receives sorter output lines as they are produced
pub type ProgressSink = Arc<dyn Fn(String) + Send + Sync>;

/// Everything a sorter gets besides the recording
#[derive(Clone)]
pub struct SortContext {
    /// Scratch directory for sorter output
    pub output_dir: PathBuf,
    pub params: SorterParams,
    pub progress: Option<ProgressSink>,
}

impl SortContext {
    pub fn new(output_dir: impl Into<PathBuf>, params: SorterParams) -> Self {
        Self {
            output_dir: output_dir.into(),
            params,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Forward a line to the progress sink, if any
    pub fn report(&self, line: impl Into<String>) {
        if let Some(sink) = &self.progress {
            sink(line.into());
        }
    }
}

impl fmt::Debug for SortContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortContext")
            .field("output_dir", &self.output_dir)
            .field("params", &self.params)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// A spike sorter
#[async_trait]
pub trait Sorter: Send + Sync {
    /// Name shown in logs and errors
    fn name(&self) -> &str;

    /// Everything that selects what the sorter does, recorded in cache
    /// fingerprints
    fn identity(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name() })
    }

    /// Check if the sorter can run on this system
    async fn is_available(&self) -> bool;

    /// Sort a recording
    async fn run(&self, recording: &Recording, ctx: &SortContext) -> StashResult<Sorting>;
}

/// Create the sorter selected in the configuration
pub fn create_sorter(config: &SorterConfig) -> StashResult<Box<dyn Sorter>> {
    match config.backend {
        SorterBackend::Threshold => Ok(Box::new(ThresholdSorter::new())),
        SorterBackend::External => {
            let command = config.command.clone().ok_or_else(|| {
                StashError::SorterNotAvailable("external backend without sorter.command".to_string())
            })?;
            Ok(Box::new(ExternalSorter::new(command, config.args.clone())))
        }
    }
}
