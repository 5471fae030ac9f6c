//! Spike amplitudes
//!
//! Each unit gets an extremum channel from its template (mean waveform over
//! the unit's channel group). A spike's amplitude is the trace value on that
//! channel at the spike frame.

use crate::cache::Artifact;
use crate::error::{StashError, StashResult};
use crate::recording::Recording;
use crate::sorting::Sorting;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::debug;

/// File spike amplitudes are stored in
pub const AMPLITUDES_FILE: &str = "amplitudes.json";

/// Which template peak selects the extremum channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakSign {
    #[default]
    Neg,
    Pos,
    Both,
}

impl FromStr for PeakSign {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neg" => Ok(Self::Neg),
            "pos" => Ok(Self::Pos),
            "both" => Ok(Self::Both),
            other => Err(StashError::User(format!(
                "peak sign must be neg, pos or both (got '{}')",
                other
            ))),
        }
    }
}

impl fmt::Display for PeakSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neg => write!(f, "neg"),
            Self::Pos => write!(f, "pos"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// Spike amplitude parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplitudeParams {
    pub peak_sign: PeakSign,
    /// Report µV instead of raw sample values
    pub return_scaled: bool,
    /// Template window before the spike, ms
    pub ms_before: f64,
    /// Template window after the spike, ms
    pub ms_after: f64,
}

impl Default for AmplitudeParams {
    fn default() -> Self {
        Self {
            peak_sign: PeakSign::Neg,
            return_scaled: true,
            ms_before: 1.0,
            ms_after: 2.0,
        }
    }
}

/// Amplitude of one spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeAmplitude {
    pub frame: u64,
    pub unit_id: u32,
    pub amplitude: f64,
}

/// Spike amplitudes of a sorting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeAmplitudes {
    pub params: AmplitudeParams,
    /// Extremum channel id per unit
    pub extremum_channels: BTreeMap<u32, usize>,
    /// All spikes ordered by frame, then unit
    pub spikes: Vec<SpikeAmplitude>,
}

impl SpikeAmplitudes {
    /// Amplitudes in spike order
    pub fn concatenated(&self) -> Vec<f64> {
        self.spikes.iter().map(|s| s.amplitude).collect()
    }

    /// Amplitudes per unit, each in frame order
    pub fn by_unit(&self) -> BTreeMap<u32, Vec<f64>> {
        let mut units: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for spike in &self.spikes {
            units.entry(spike.unit_id).or_default().push(spike.amplitude);
        }
        units
    }
}

fn ms_to_samples(ms: f64, sampling_frequency: f64) -> usize {
    (ms * sampling_frequency / 1000.0).round().max(0.0) as usize
}

/// Compute spike amplitudes for every unit of a sorting
pub async fn compute_spike_amplitudes(
    recording: &Recording,
    sorting: &Sorting,
    params: &AmplitudeParams,
) -> StashResult<SpikeAmplitudes> {
    let traces = recording.read_traces().await?;
    let num_samples = recording.num_samples();
    let groups = recording.split_by_group();
    let all_channels: Vec<usize> = (0..recording.num_channels()).collect();
    let before = ms_to_samples(params.ms_before, recording.sampling_frequency());
    let after = ms_to_samples(params.ms_after, recording.sampling_frequency());

    let mut extremum_channels = BTreeMap::new();
    let mut spikes = vec![];

    for unit in &sorting.units {
        if let Some(&frame) = unit.frames.iter().find(|&&f| f as usize >= num_samples) {
            return Err(StashError::SortingInvalid(format!(
                "unit {} has a spike at frame {} beyond the recording ({} samples)",
                unit.id, frame, num_samples
            )));
        }
        if unit.frames.is_empty() {
            continue;
        }

        let channels = groups.get(&unit.group).unwrap_or(&all_channels);
        let channel = extremum_channel(&traces, channels, &unit.frames, before, after, params.peak_sign);
        let info = &recording.channels()[channel];
        extremum_channels.insert(unit.id, info.id);

        for &frame in &unit.frames {
            let raw = f64::from(traces[channel][frame as usize]);
            let amplitude = if params.return_scaled {
                raw * info.gain_uv + info.offset_uv
            } else {
                raw
            };
            spikes.push(SpikeAmplitude {
                frame,
                unit_id: unit.id,
                amplitude,
            });
        }
    }

    spikes.sort_by_key(|s| (s.frame, s.unit_id));
    debug!(
        "Computed {} spike amplitudes for {} units",
        spikes.len(),
        extremum_channels.len()
    );

    Ok(SpikeAmplitudes {
        params: params.clone(),
        extremum_channels,
        spikes,
    })
}

/// Channel whose template peak is most extreme in the `sign` direction
fn extremum_channel(
    traces: &[Vec<i16>],
    channels: &[usize],
    frames: &[u64],
    before: usize,
    after: usize,
    sign: PeakSign,
) -> usize {
    let num_samples = traces.first().map_or(0, Vec::len);
    let mut windowed: Vec<usize> = frames
        .iter()
        .map(|&f| f as usize)
        .filter(|&f| f >= before && f + after < num_samples)
        .collect();
    let (before, width) = if windowed.is_empty() {
        windowed = frames.iter().map(|&f| f as usize).collect();
        (0, 1)
    } else {
        (before, before + after + 1)
    };

    let mut best = (channels.first().copied().unwrap_or(0), f64::NEG_INFINITY);
    for &channel in channels {
        let mut template = vec![0.0; width];
        for &frame in &windowed {
            for (k, value) in template.iter_mut().enumerate() {
                *value += f64::from(traces[channel][frame - before + k]);
            }
        }
        let n = windowed.len() as f64;
        let peak = template
            .iter()
            .map(|v| v / n)
            .map(|v| match sign {
                PeakSign::Neg => -v,
                PeakSign::Pos => v,
                PeakSign::Both => v.abs(),
            })
            .fold(f64::NEG_INFINITY, f64::max);

        if peak > best.1 {
            best = (channel, peak);
        }
    }
    best.0
}

#[async_trait]
impl Artifact for SpikeAmplitudes {
    const KIND: &'static str = "spike_amplitudes";

    async fn save(&self, dir: &Path) -> StashResult<()> {
        let path = dir.join(AMPLITUDES_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .await
            .map_err(|e| StashError::io(format!("writing {}", path.display()), e))
    }

    async fn load(dir: &Path) -> StashResult<Self> {
        let path = dir.join(AMPLITUDES_FILE);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StashError::io(format!("reading {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }
}
