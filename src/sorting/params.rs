//! Sorter parameters

use crate::probe::ElectrodeType;
use serde::{Deserialize, Serialize};

/// Spike sorter parameters, in the klusta parameter layout
///
/// The built-in threshold sorter uses the threshold, sign and extraction
/// window fields. External sorters receive the whole set as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterParams {
    /// Neighbourhood radius in µm (None = whole channel group)
    pub adjacency_radius: Option<f64>,

    /// Detection threshold in noise standard deviations
    pub threshold_strong_std_factor: f64,

    /// Threshold for extending a detected spike
    pub threshold_weak_std_factor: f64,

    /// -1 = negative peaks, 1 = positive peaks, 0 = both
    pub detect_sign: i8,

    /// Samples kept before the peak
    pub extract_s_before: usize,

    /// Samples kept after the peak
    pub extract_s_after: usize,

    pub n_features_per_channel: usize,
    pub pca_n_waveforms_max: usize,
    pub num_starting_clusters: usize,

    /// Worker count (-1 = all cores)
    pub n_jobs: i32,

    pub total_memory: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_memory: Option<String>,
    pub chunk_duration: Option<String>,
    pub progress_bar: bool,
}

impl Default for SorterParams {
    fn default() -> Self {
        Self::tetrode()
    }
}

impl SorterParams {
    /// Preset for tetrode recordings
    pub fn tetrode() -> Self {
        Self {
            adjacency_radius: None,
            threshold_strong_std_factor: 3.5,
            threshold_weak_std_factor: 1.5,
            detect_sign: -1,
            extract_s_before: 16,
            extract_s_after: 32,
            n_features_per_channel: 3,
            pca_n_waveforms_max: 10000,
            num_starting_clusters: 50,
            n_jobs: -1,
            total_memory: None,
            chunk_size: None,
            chunk_memory: None,
            chunk_duration: Some("1s".to_string()),
            progress_bar: true,
        }
    }

    /// Preset for silicon probe recordings
    pub fn probe() -> Self {
        Self {
            threshold_strong_std_factor: 5.0,
            threshold_weak_std_factor: 2.0,
            ..Self::tetrode()
        }
    }

    /// Preset for an electrode type
    pub fn for_electrode(electrode: ElectrodeType) -> Self {
        match electrode {
            ElectrodeType::Tetrode => Self::tetrode(),
            ElectrodeType::Probe => Self::probe(),
        }
    }
}
