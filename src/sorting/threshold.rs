//! Built-in threshold sorter
//!
//! Detects threshold crossings per channel group and assigns every spike to
//! a unit by the channel it peaks on. It is a detector, not a clustering
//! algorithm; use an external sorter for real clustering.

use super::sorter::{SortContext, Sorter};
use super::{SorterParams, Sorting, Unit};
use crate::error::{StashError, StashResult};
use crate::recording::Recording;
use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// MAD to standard deviation for Gaussian noise
const MAD_SCALE: f64 = 0.6745;

/// Threshold crossing detector
#[derive(Debug, Clone, Default)]
pub struct ThresholdSorter;

impl ThresholdSorter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sorter for ThresholdSorter {
    fn name(&self) -> &str {
        "threshold"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, recording: &Recording, ctx: &SortContext) -> StashResult<Sorting> {
        let traces = Arc::new(recording.read_traces().await?);
        let groups = recording.split_by_group();
        let total = groups.len();

        let tasks = groups.into_iter().map(|(group, channels)| {
            let traces = Arc::clone(&traces);
            let params = ctx.params.clone();
            tokio::task::spawn_blocking(move || {
                let spikes = detect_group(&traces, &channels, &params);
                (group, channels.len(), spikes)
            })
        });

        let results = try_join_all(tasks)
            .await
            .map_err(|e| StashError::Internal(format!("sorter task failed: {}", e)))?;

        let mut units = vec![];
        for (index, (group, num_channels, spikes)) in results.into_iter().enumerate() {
            let count: usize = spikes.values().map(Vec::len).sum();
            ctx.report(format!(
                "[{}/{}] group {}: {} spikes on {} channels",
                index + 1,
                total,
                group,
                count,
                num_channels
            ));
            for (_, frames) in spikes {
                units.push(Unit {
                    id: units.len() as u32,
                    group,
                    frames,
                });
            }
        }

        debug!("Threshold sorter found {} units", units.len());
        Ok(Sorting::new(recording.sampling_frequency(), units))
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Median and MAD-based noise level of a trace
fn noise_level(trace: &[i16]) -> (f64, f64) {
    let mut values: Vec<f64> = trace.iter().map(|&v| f64::from(v)).collect();
    let center = median(&mut values);
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    (center, median(&mut deviations) / MAD_SCALE)
}

fn oriented(value: f64, sign: i8) -> f64 {
    match sign.signum() {
        -1 => -value,
        1 => value,
        _ => value.abs(),
    }
}

/// Spike frames per peak channel for one channel group
fn detect_group(
    traces: &[Vec<i16>],
    channels: &[usize],
    params: &SorterParams,
) -> BTreeMap<usize, Vec<u64>> {
    let mut spikes: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
    let Some(num_samples) = channels.first().map(|&c| traces[c].len()) else {
        return spikes;
    };

    let noise: Vec<(f64, f64)> = channels.iter().map(|&c| noise_level(&traces[c])).collect();
    let score = |i: usize, t: usize| -> f64 {
        let (center, sigma) = noise[i];
        if sigma <= 0.0 {
            return 0.0;
        }
        oriented(f64::from(traces[channels[i]][t]) - center, params.detect_sign) / sigma
    };

    let before = params.extract_s_before;
    let after = params.extract_s_after.max(1);
    let threshold = params.threshold_strong_std_factor;

    let mut t = 0;
    while t < num_samples {
        let crossed = (0..channels.len()).any(|i| score(i, t) > threshold);
        if !crossed {
            t += 1;
            continue;
        }

        let end = (t + after).min(num_samples);
        let mut peak = (t, 0, f64::NEG_INFINITY);
        for s in t..end {
            for i in 0..channels.len() {
                let value = score(i, s);
                if value > peak.2 {
                    peak = (s, i, value);
                }
            }
        }

        let (frame, channel, _) = peak;
        if frame >= before && frame + after <= num_samples {
            spikes
                .entry(channels[channel])
                .or_default()
                .push(frame as u64);
        }
        t = frame + after;
    }

    spikes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{generate_tetrodes, DEFAULT_TETRODE_SPACING};
    use crate::recording::GroupMode;
    use std::path::Path;
    use tempfile::TempDir;

    /// Deterministic noise in [-20, 20] plus negative spikes at `(frame, channel)`
    fn write_spiky(dir: &Path, num_channels: usize, frames: usize, spikes: &[(usize, usize)]) -> std::path::PathBuf {
        let mut state: u32 = 12345;
        let mut data = vec![0i16; num_channels * frames];
        for v in data.iter_mut() {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            *v = ((state >> 16) % 41) as i16 - 20;
        }
        for &(frame, channel) in spikes {
            data[frame * num_channels + channel] = -2000;
            let neighbour = channel ^ 1;
            data[frame * num_channels + neighbour] = -600;
        }

        let path = dir.join("raw.bin");
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    async fn tetrode_recording(dir: &Path, spikes: &[(usize, usize)]) -> Recording {
        let path = write_spiky(dir, 8, 1000, spikes);
        let mut rec = Recording::from_binary(&path, 8, 10000.0, 1.0).await.unwrap();
        rec.set_probegroup(&generate_tetrodes(2, DEFAULT_TETRODE_SPACING), GroupMode::ByProbe)
            .unwrap();
        rec
    }

    #[test]
    fn median_and_noise() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);

        let (center, sigma) = noise_level(&[0, 0, 0, 0]);
        assert_eq!(center, 0.0);
        assert_eq!(sigma, 0.0);
    }

    #[tokio::test]
    async fn finds_spikes_on_peak_channel() {
        let dir = TempDir::new().unwrap();
        let rec = tetrode_recording(dir.path(), &[(100, 1), (300, 1), (500, 6)]).await;
        let ctx = SortContext::new(dir.path().join("out"), SorterParams::tetrode());

        let sorting = ThresholdSorter::new().run(&rec, &ctx).await.unwrap();

        assert_eq!(sorting.units.len(), 2);
        assert_eq!(sorting.units[0].group, 0);
        assert_eq!(sorting.units[0].frames, vec![100, 300]);
        assert_eq!(sorting.units[1].group, 1);
        assert_eq!(sorting.units[1].frames, vec![500]);
        assert_eq!(sorting.sampling_frequency, 10000.0);
    }

    #[tokio::test]
    async fn drops_edge_spikes_and_enforces_dead_time() {
        let dir = TempDir::new().unwrap();
        let rec = tetrode_recording(dir.path(), &[(5, 0), (200, 2), (210, 2), (990, 3)]).await;
        let ctx = SortContext::new(dir.path().join("out"), SorterParams::tetrode());

        let sorting = ThresholdSorter::new().run(&rec, &ctx).await.unwrap();

        assert_eq!(sorting.num_spikes(), 1);
        assert_eq!(sorting.units[0].frames, vec![200]);
    }

    #[tokio::test]
    async fn positive_sign_ignores_negative_spikes() {
        let dir = TempDir::new().unwrap();
        let rec = tetrode_recording(dir.path(), &[(100, 1)]).await;
        let params = SorterParams {
            detect_sign: 1,
            ..SorterParams::tetrode()
        };
        let ctx = SortContext::new(dir.path().join("out"), params);

        let sorting = ThresholdSorter::new().run(&rec, &ctx).await.unwrap();
        assert_eq!(sorting.num_spikes(), 0);
    }

    #[tokio::test]
    async fn reports_each_group() {
        let dir = TempDir::new().unwrap();
        let rec = tetrode_recording(dir.path(), &[(100, 1)]).await;
        let lines = Arc::new(std::sync::Mutex::new(vec![]));
        let captured = Arc::clone(&lines);
        let ctx = SortContext::new(dir.path().join("out"), SorterParams::tetrode())
            .with_progress(Arc::new(move |l| captured.lock().unwrap().push(l)));

        ThresholdSorter::new().run(&rec, &ctx).await.unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[1/2] group 0: 1 spikes"));
        assert!(lines[1].starts_with("[2/2] group 1: 0 spikes"));
    }
}
