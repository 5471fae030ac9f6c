//! Multi-channel extracellular recordings
//!
//! A [`Recording`] is a lazy view over an interleaved little-endian `i16`
//! traces file. Channel selection and probe attachment only change metadata;
//! samples are read when traces are requested or the recording is saved.

pub mod header;

use crate::cache::Artifact;
use crate::error::{StashError, StashResult};
use crate::probe::{Probe, ProbeGroup};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::debug;

/// Metadata file of a saved recording
pub const RECORDING_FILE: &str = "recording.json";

/// Sample file of a saved recording
pub const TRACES_FILE: &str = "traces.raw";

const SAMPLE_BYTES: usize = std::mem::size_of::<i16>();

/// Frames copied per read when saving
const SAVE_CHUNK_FRAMES: usize = 65_536;

/// How channel groups are derived from a probe group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// One group per probe
    #[default]
    ByProbe,
    /// One group per (probe, shank)
    ByShank,
}

/// One recorded channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id in the source file
    pub id: usize,
    /// µV per bit
    pub gain_uv: f64,
    /// µV added after scaling
    #[serde(default)]
    pub offset_uv: f64,
    /// Channel group, assigned from the probe
    #[serde(default)]
    pub group: i64,
    /// Contact position, µm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<[f64; 2]>,
}

/// Identity of the samples behind a recording, used for cache fingerprints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracesIdentity {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_secs: Option<u64>,
    pub stride: usize,
    pub columns: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordingMeta {
    sampling_frequency: f64,
    num_samples: usize,
    channels: Vec<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    probe_group: Option<ProbeGroup>,
}

/// A view over a binary traces file
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    traces_path: PathBuf,
    sampling_frequency: f64,
    num_samples: usize,
    /// Channels per frame in the traces file
    stride: usize,
    /// File column of each selected channel
    columns: Vec<usize>,
    channels: Vec<Channel>,
    probe_group: Option<ProbeGroup>,
}

impl Recording {
    /// Open a raw interleaved `i16` file with `num_channels` channels per frame
    pub async fn from_binary(
        path: &Path,
        num_channels: usize,
        sampling_frequency: f64,
        gain_uv: f64,
    ) -> StashResult<Self> {
        if num_channels == 0 {
            return Err(StashError::recording(path, "channel count must be positive"));
        }
        if sampling_frequency <= 0.0 {
            return Err(StashError::recording(path, "sampling frequency must be positive"));
        }

        let meta = fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StashError::PathNotFound(path.to_path_buf())
            } else {
                StashError::io(format!("reading {}", path.display()), e)
            }
        })?;

        let frame = (num_channels * SAMPLE_BYTES) as u64;
        if meta.len() % frame != 0 {
            return Err(StashError::recording(
                path,
                format!(
                    "{} bytes is not a whole number of {}-channel frames",
                    meta.len(),
                    num_channels
                ),
            ));
        }

        let channels = (0..num_channels)
            .map(|id| Channel {
                id,
                gain_uv,
                offset_uv: 0.0,
                group: 0,
                location: None,
            })
            .collect();

        Ok(Self {
            traces_path: path.to_path_buf(),
            sampling_frequency,
            num_samples: (meta.len() / frame) as usize,
            stride: num_channels,
            columns: (0..num_channels).collect(),
            channels,
            probe_group: None,
        })
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_samples as f64 / self.sampling_frequency
    }

    pub fn channel_ids(&self) -> Vec<usize> {
        self.channels.iter().map(|c| c.id).collect()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn probe_group(&self) -> Option<&ProbeGroup> {
        self.probe_group.as_ref()
    }

    pub fn traces_path(&self) -> &Path {
        &self.traces_path
    }

    /// Directory this recording was loaded from, if it is an unmodified
    /// saved recording
    pub fn persisted_dir(&self) -> Option<&Path> {
        let dir = self.traces_path.parent()?;
        let whole = self.stride == self.channels.len()
            && self.columns.iter().copied().eq(0..self.stride);
        (whole
            && self.traces_path.file_name().is_some_and(|n| n == TRACES_FILE)
            && dir.join(RECORDING_FILE).is_file())
        .then_some(dir)
    }

    /// Keep only the channels with the given ids, in that order
    pub fn channel_slice(&self, ids: &[usize]) -> StashResult<Self> {
        if ids.len() > self.num_channels() {
            return Err(StashError::ChannelCount {
                requested: ids.len(),
                available: self.num_channels(),
            });
        }

        let mut columns = Vec::with_capacity(ids.len());
        let mut channels = Vec::with_capacity(ids.len());
        for id in ids {
            let index = self
                .channels
                .iter()
                .position(|c| c.id == *id)
                .ok_or_else(|| {
                    StashError::recording(&self.traces_path, format!("no channel with id {}", id))
                })?;
            columns.push(self.columns[index]);
            channels.push(self.channels[index].clone());
        }

        Ok(Self {
            columns,
            channels,
            ..self.clone()
        })
    }

    /// Keep the first `n` channels
    pub fn select_first(&self, n: usize) -> StashResult<Self> {
        if n > self.num_channels() {
            return Err(StashError::ChannelCount {
                requested: n,
                available: self.num_channels(),
            });
        }
        let ids: Vec<usize> = self.channels[..n].iter().map(|c| c.id).collect();
        self.channel_slice(&ids)
    }

    /// Attach a single probe; every wired channel lands in group 0
    pub fn set_probe(&mut self, probe: &Probe) -> StashResult<()> {
        let group = ProbeGroup {
            probes: vec![probe.clone()],
        };
        self.set_probegroup(&group, GroupMode::ByProbe)
    }

    /// Attach a probe group
    ///
    /// Device channel indices address the currently selected channels.
    /// Channels no contact is wired to are dropped.
    pub fn set_probegroup(&mut self, group: &ProbeGroup, mode: GroupMode) -> StashResult<()> {
        let mut assigned: BTreeMap<usize, (i64, [f64; 2])> = BTreeMap::new();
        let mut shank_groups: Vec<(usize, String)> = vec![];

        for (probe_index, probe) in group.probes.iter().enumerate() {
            for (contact, channel) in probe.wiring() {
                if channel >= self.num_channels() {
                    return Err(StashError::ProbeMismatch(format!(
                        "probe {} wires contact {} to channel {} but the recording has {} channels",
                        probe_index,
                        contact,
                        channel,
                        self.num_channels()
                    )));
                }

                let group_id = match mode {
                    GroupMode::ByProbe => probe_index as i64,
                    GroupMode::ByShank => {
                        let shank = probe.shank_of(contact).unwrap_or_default().to_string();
                        let key = (probe_index, shank);
                        match shank_groups.iter().position(|k| *k == key) {
                            Some(i) => i as i64,
                            None => {
                                shank_groups.push(key);
                                (shank_groups.len() - 1) as i64
                            }
                        }
                    }
                };

                if assigned
                    .insert(channel, (group_id, probe.contact_positions[contact]))
                    .is_some()
                {
                    return Err(StashError::ProbeMismatch(format!(
                        "channel {} is wired to more than one contact",
                        channel
                    )));
                }
            }
        }

        if assigned.is_empty() {
            return Err(StashError::ProbeMismatch(
                "probe group wires no channels".to_string(),
            ));
        }

        let dropped = self.num_channels() - assigned.len();
        if dropped > 0 {
            debug!("Dropping {} channel(s) without a contact", dropped);
        }

        let mut columns = Vec::with_capacity(assigned.len());
        let mut channels = Vec::with_capacity(assigned.len());
        for (index, (group_id, location)) in assigned {
            let mut channel = self.channels[index].clone();
            channel.group = group_id;
            channel.location = Some(location);
            columns.push(self.columns[index]);
            channels.push(channel);
        }

        self.columns = columns;
        self.channels = channels;
        self.probe_group = Some(group.clone());
        Ok(())
    }

    /// Selected channel indices per channel group
    pub fn split_by_group(&self) -> BTreeMap<i64, Vec<usize>> {
        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (index, channel) in self.channels.iter().enumerate() {
            groups.entry(channel.group).or_default().push(index);
        }
        groups
    }

    /// Read the samples of every selected channel
    pub async fn read_traces(&self) -> StashResult<Vec<Vec<i16>>> {
        let bytes = fs::read(&self.traces_path)
            .await
            .map_err(|e| StashError::io(format!("reading {}", self.traces_path.display()), e))?;

        let frame = self.stride * SAMPLE_BYTES;
        if bytes.len() < self.num_samples * frame {
            return Err(StashError::recording(
                &self.traces_path,
                "traces file is shorter than its metadata",
            ));
        }

        let mut traces: Vec<Vec<i16>> = self
            .columns
            .iter()
            .map(|_| Vec::with_capacity(self.num_samples))
            .collect();
        for frame_bytes in bytes.chunks_exact(frame).take(self.num_samples) {
            for (trace, &column) in traces.iter_mut().zip(&self.columns) {
                let at = column * SAMPLE_BYTES;
                trace.push(i16::from_le_bytes([frame_bytes[at], frame_bytes[at + 1]]));
            }
        }
        Ok(traces)
    }

    /// Write the selected channels to `out` as interleaved samples, reading
    /// `chunk_frames` frames at a time
    async fn write_selected(&self, out: &Path, chunk_frames: usize) -> StashResult<()> {
        let frame = self.stride * SAMPLE_BYTES;
        let source = &self.traces_path;
        let read_err = |e| StashError::io(format!("reading {}", source.display()), e);
        let write_err = |e| StashError::io(format!("writing {}", out.display()), e);

        let size = fs::metadata(source).await.map_err(read_err)?.len();
        if size < (self.num_samples * frame) as u64 {
            return Err(StashError::recording(
                source,
                "traces file is shorter than its metadata",
            ));
        }

        let mut reader = fs::File::open(source).await.map_err(read_err)?;
        let mut writer = BufWriter::new(fs::File::create(out).await.map_err(write_err)?);
        let chunk_frames = chunk_frames.max(1);
        let mut chunk = vec![0u8; chunk_frames * frame];
        let mut selected = Vec::with_capacity(chunk_frames * self.columns.len() * SAMPLE_BYTES);

        let mut remaining = self.num_samples;
        while remaining > 0 && frame > 0 {
            let frames = remaining.min(chunk_frames);
            let buf = &mut chunk[..frames * frame];
            reader.read_exact(buf).await.map_err(read_err)?;

            selected.clear();
            for frame_bytes in buf.chunks_exact(frame) {
                for &column in &self.columns {
                    let at = column * SAMPLE_BYTES;
                    selected.extend_from_slice(&frame_bytes[at..at + SAMPLE_BYTES]);
                }
            }
            writer.write_all(&selected).await.map_err(write_err)?;
            remaining -= frames;
        }

        writer.flush().await.map_err(write_err)
    }

    /// Identity of the underlying samples
    pub async fn identity(&self) -> StashResult<TracesIdentity> {
        let meta = fs::metadata(&self.traces_path)
            .await
            .map_err(|e| StashError::io(format!("reading {}", self.traces_path.display()), e))?;
        let modified_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs());

        Ok(TracesIdentity {
            path: std::path::absolute(&self.traces_path).unwrap_or_else(|_| self.traces_path.clone()),
            size_bytes: meta.len(),
            modified_secs,
            stride: self.stride,
            columns: self.columns.clone(),
        })
    }
}

#[async_trait]
impl Artifact for Recording {
    const KIND: &'static str = "recording";

    async fn save(&self, dir: &Path) -> StashResult<()> {
        self.write_selected(&dir.join(TRACES_FILE), SAVE_CHUNK_FRAMES).await?;

        let meta = RecordingMeta {
            sampling_frequency: self.sampling_frequency,
            num_samples: self.num_samples,
            channels: self.channels.clone(),
            probe_group: self.probe_group.clone(),
        };
        let meta_path = dir.join(RECORDING_FILE);
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .await
            .map_err(|e| StashError::io(format!("writing {}", meta_path.display()), e))
    }

    async fn load(dir: &Path) -> StashResult<Self> {
        let meta_path = dir.join(RECORDING_FILE);
        let content = fs::read_to_string(&meta_path)
            .await
            .map_err(|e| StashError::io(format!("reading {}", meta_path.display()), e))?;
        let meta: RecordingMeta = serde_json::from_str(&content)
            .map_err(|e| StashError::recording(&meta_path, e.to_string()))?;

        let traces_path = dir.join(TRACES_FILE);
        let stride = meta.channels.len();
        let size = fs::metadata(&traces_path)
            .await
            .map_err(|e| StashError::io(format!("reading {}", traces_path.display()), e))?
            .len();
        if size != (meta.num_samples * stride * SAMPLE_BYTES) as u64 {
            return Err(StashError::recording(
                &traces_path,
                format!(
                    "expected {} samples of {} channels, found {} bytes",
                    meta.num_samples, stride, size
                ),
            ));
        }

        Ok(Self {
            traces_path,
            sampling_frequency: meta.sampling_frequency,
            num_samples: meta.num_samples,
            stride,
            columns: (0..stride).collect(),
            channels: meta.channels,
            probe_group: meta.probe_group,
        })
    }
}
