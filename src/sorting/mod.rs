//! Sorting results and sorters

pub mod external;
pub mod params;
pub mod sorter;
pub mod threshold;

pub use external::ExternalSorter;
pub use params::SorterParams;
pub use sorter::{create_sorter, ProgressSink, SortContext, Sorter};
pub use threshold::ThresholdSorter;

use crate::cache::Artifact;
use crate::error::{StashError, StashResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// File a sorting is stored in
pub const SORTING_FILE: &str = "sorting.json";

/// One sorted unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u32,
    /// Channel group the unit was found on
    #[serde(default)]
    pub group: i64,
    /// Spike times in samples, ascending
    pub frames: Vec<u64>,
}

/// Units found in one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sorting {
    pub sampling_frequency: f64,
    pub units: Vec<Unit>,
}

impl Sorting {
    /// Build a sorting, sorting every unit's spike train
    pub fn new(sampling_frequency: f64, mut units: Vec<Unit>) -> Self {
        for unit in &mut units {
            unit.frames.sort_unstable();
        }
        Self {
            sampling_frequency,
            units,
        }
    }

    pub fn unit_ids(&self) -> Vec<u32> {
        self.units.iter().map(|u| u.id).collect()
    }

    /// Total number of spikes
    pub fn num_spikes(&self) -> usize {
        self.units.iter().map(|u| u.frames.len()).sum()
    }

    /// Drop units without spikes
    pub fn remove_empty_units(mut self) -> Self {
        self.units.retain(|u| !u.frames.is_empty());
        self
    }

    /// Read a `sorting.json` file
    pub async fn from_file(path: &Path) -> StashResult<Self> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StashError::SortingInvalid(format!("{} not found", path.display()))
            } else {
                StashError::io(format!("reading {}", path.display()), e)
            }
        })?;
        let sorting: Self = serde_json::from_str(&content)
            .map_err(|e| StashError::SortingInvalid(format!("{}: {}", path.display(), e)))?;
        sorting.validate()?;
        Ok(Self::new(sorting.sampling_frequency, sorting.units))
    }

    /// Write a `sorting.json` file
    pub async fn write_file(&self, path: &Path) -> StashResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .await
            .map_err(|e| StashError::io(format!("writing {}", path.display()), e))
    }

    fn validate(&self) -> StashResult<()> {
        if self.sampling_frequency <= 0.0 {
            return Err(StashError::SortingInvalid(
                "sampling frequency must be positive".to_string(),
            ));
        }
        let mut ids = self.unit_ids();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(StashError::SortingInvalid("duplicate unit ids".to_string()));
        }
        Ok(())
    }
}

/// Combine sortings into one, renumbering units `0..n` in input order
pub fn aggregate_units(sortings: Vec<Sorting>) -> StashResult<Sorting> {
    let sampling_frequency = sortings
        .first()
        .map(|s| s.sampling_frequency)
        .ok_or_else(|| StashError::SortingInvalid("nothing to aggregate".to_string()))?;

    if let Some(other) = sortings
        .iter()
        .find(|s| s.sampling_frequency != sampling_frequency)
    {
        return Err(StashError::SortingInvalid(format!(
            "cannot aggregate sortings at {} Hz and {} Hz",
            sampling_frequency, other.sampling_frequency
        )));
    }

    let units = sortings
        .into_iter()
        .flat_map(|s| s.units)
        .enumerate()
        .map(|(id, unit)| Unit {
            id: id as u32,
            ..unit
        })
        .collect();

    Ok(Sorting::new(sampling_frequency, units))
}

#[async_trait]
impl Artifact for Sorting {
    const KIND: &'static str = "sorting";

    async fn save(&self, dir: &Path) -> StashResult<()> {
        self.write_file(&dir.join(SORTING_FILE)).await
    }

    async fn load(dir: &Path) -> StashResult<Self> {
        Self::from_file(&dir.join(SORTING_FILE)).await
    }
}
