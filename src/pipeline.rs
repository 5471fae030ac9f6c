//! Cached processing stages
//!
//! Each stage derives a cache key from the item name and everything that
//! determines its output, then loads the stored artifact or computes it.
//!
//! | Stage | Label | Fingerprint covers |
//! |-------|-------|--------------------|
//! | `preprocess` | `preprocessed` | electrode, channel count, probe layout, source traces |
//! | `sort` | suffix (`sorting`) | sorter identity (command and args for external sorters), parameters, electrode, recording traces |
//! | `spike_amplitudes` | `{suffix}.amplitudes` | sorting entry, amplitude parameters |

use crate::cache::{ArtifactStore, Cached};
use crate::error::{StashError, StashResult};
use crate::postprocessing::{compute_spike_amplitudes, AmplitudeParams, SpikeAmplitudes};
use crate::probe::{ElectrodeType, ProbeGroup, ProbeSource};
use crate::recording::{GroupMode, Recording, TracesIdentity};
use crate::sorting::{aggregate_units, ProgressSink, SortContext, Sorter, SorterParams, Sorting};
use serde::Serialize;
use tracing::{debug, info};

/// Label of preprocessed recordings
pub const PREPROCESSED_LABEL: &str = "preprocessed";

/// Default label of sortings
pub const DEFAULT_SORTING_SUFFIX: &str = "sorting";

/// Scratch directory sorters write into, inside the sorting entry
pub const SORTER_OUTPUT_DIR: &str = "sorter_output";

#[derive(Serialize)]
struct PreprocessKey<'a> {
    electrode: ElectrodeType,
    num_channels: usize,
    probe: &'a ProbeGroup,
    source: TracesIdentity,
}

#[derive(Serialize)]
struct SortKey<'a> {
    sorter: serde_json::Value,
    electrode: ElectrodeType,
    params: &'a SorterParams,
    recording: TracesIdentity,
}

#[derive(Serialize)]
struct AmplitudeKey<'a> {
    sorting: &'a str,
    params: &'a AmplitudeParams,
}

/// Cut a recording to `num_channels` channels, attach its probe and store it
pub async fn preprocess(
    store: &ArtifactStore,
    recording: &Recording,
    name: &str,
    electrode: ElectrodeType,
    num_channels: usize,
    probe_source: &ProbeSource,
) -> StashResult<Cached<Recording>> {
    let probe_group = probe_source.load().await?;
    let key = store.key(
        name,
        PREPROCESSED_LABEL,
        &PreprocessKey {
            electrode,
            num_channels,
            probe: &probe_group,
            source: recording.identity().await?,
        },
    )?;
    debug!("Preprocess key {}", key);

    let probe_group = &probe_group;
    let cached = store
        .get_or_compute(&key, |_scratch| async move {
            let mut sliced = recording.select_first(num_channels)?;
            match electrode {
                // The probe is treated as a single shank
                ElectrodeType::Probe => sliced.set_probe(&probe_group.to_single_probe()?)?,
                ElectrodeType::Tetrode => sliced.set_probegroup(probe_group, GroupMode::ByProbe)?,
            }
            Ok(sliced)
        })
        .await?;

    info!(
        "{}-channel {} recording {} ({})",
        cached.value.num_channels(),
        electrode,
        cached.outcome,
        cached.path.display()
    );
    Ok(cached)
}

/// Sort a preprocessed recording and store the result under `suffix`
#[allow(clippy::too_many_arguments)]
pub async fn sort(
    store: &ArtifactStore,
    recording: &Recording,
    name: &str,
    electrode: ElectrodeType,
    suffix: &str,
    sorter: &dyn Sorter,
    params: &SorterParams,
    progress: Option<ProgressSink>,
) -> StashResult<Cached<Sorting>> {
    let key = store.key(
        name,
        suffix,
        &SortKey {
            sorter: sorter.identity(),
            electrode,
            params,
            recording: recording.identity().await?,
        },
    )?;
    debug!("Sort key {}", key);

    let cached = store
        .get_or_compute(&key, |scratch| async move {
            if !sorter.is_available().await {
                return Err(StashError::SorterNotAvailable(sorter.name().to_string()));
            }

            let mut ctx = SortContext::new(scratch.join(SORTER_OUTPUT_DIR), params.clone());
            if let Some(sink) = progress {
                ctx = ctx.with_progress(sink);
            }

            let sorting = sorter.run(recording, &ctx).await?;
            info!("{} found {} units", sorter.name(), sorting.units.len());
            aggregate_units(vec![sorting.remove_empty_units()])
        })
        .await?;

    info!(
        "Sorting with {} units {} ({})",
        cached.value.units.len(),
        cached.outcome,
        cached.path.display()
    );
    Ok(cached)
}

/// Compute spike amplitudes of a stored sorting
pub async fn spike_amplitudes(
    store: &ArtifactStore,
    recording: &Recording,
    sorting: &Cached<Sorting>,
    params: &AmplitudeParams,
) -> StashResult<Cached<SpikeAmplitudes>> {
    let key = sorting.key.child(
        "amplitudes",
        &AmplitudeKey {
            sorting: sorting.key.fingerprint().as_str(),
            params,
        },
    )?;
    debug!("Amplitude key {}", key);

    let cached = store
        .get_or_compute(&key, |_scratch| async move {
            compute_spike_amplitudes(recording, &sorting.value, params).await
        })
        .await?;

    info!(
        "{} spike amplitudes {} ({})",
        cached.value.spikes.len(),
        cached.outcome,
        cached.path.display()
    );
    Ok(cached)
}
