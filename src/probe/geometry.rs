//! Probe and probe-group geometry
//!
//! Mirrors the probeinterface JSON layout so probe files written by other
//! tools load unchanged. Only planar (2-D) probes are supported.

use crate::error::{StashError, StashResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// Contact radius used by `generate_tetrode`, in µm
pub const TETRODE_CONTACT_RADIUS: f64 = 6.0;

/// Radius of the circle tetrode contacts sit on, in µm
pub const TETRODE_RADIUS: f64 = 10.0;

/// Default vertical spacing between generated tetrodes, in µm
pub const DEFAULT_TETRODE_SPACING: f64 = 300.0;

const SPECIFICATION: &str = "probeinterface";
const FORMAT_VERSION: &str = "0.2.21";

fn default_ndim() -> u8 {
    2
}

fn default_units() -> String {
    "um".to_string()
}

/// Shape parameters of a contact
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// A single probe: contact layout plus wiring to device channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    #[serde(default = "default_ndim")]
    pub ndim: u8,

    #[serde(default = "default_units")]
    pub si_units: String,

    #[serde(default)]
    pub annotations: BTreeMap<String, serde_json::Value>,

    /// Contact centres, µm
    pub contact_positions: Vec<[f64; 2]>,

    #[serde(default)]
    pub contact_shapes: Vec<String>,

    #[serde(default)]
    pub contact_shape_params: Vec<ShapeParams>,

    /// Device channel wired to each contact (-1 = not connected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_channel_indices: Option<Vec<i64>>,

    #[serde(default)]
    pub contact_ids: Vec<String>,

    #[serde(default)]
    pub shank_ids: Vec<String>,
}

impl Probe {
    /// Create a probe with circular contacts at the given positions
    pub fn with_circle_contacts(positions: Vec<[f64; 2]>, radius: f64) -> Self {
        let n = positions.len();
        Self {
            ndim: 2,
            si_units: default_units(),
            annotations: BTreeMap::new(),
            contact_positions: positions,
            contact_shapes: vec!["circle".to_string(); n],
            contact_shape_params: vec![
                ShapeParams {
                    radius: Some(radius),
                    ..ShapeParams::default()
                };
                n
            ],
            device_channel_indices: None,
            contact_ids: vec![],
            shank_ids: vec![],
        }
    }

    /// Number of contacts
    pub fn num_contacts(&self) -> usize {
        self.contact_positions.len()
    }

    /// Translate every contact by `[dx, dy]`
    pub fn move_by(&mut self, offset: [f64; 2]) {
        for pos in &mut self.contact_positions {
            pos[0] += offset[0];
            pos[1] += offset[1];
        }
    }

    /// Wire contacts to device channels
    pub fn set_device_channel_indices(&mut self, indices: Vec<i64>) -> StashResult<()> {
        if indices.len() != self.num_contacts() {
            return Err(StashError::ProbeMismatch(format!(
                "{} device channel indices for {} contacts",
                indices.len(),
                self.num_contacts()
            )));
        }
        self.device_channel_indices = Some(indices);
        Ok(())
    }

    /// (contact index, device channel) for every connected contact
    pub fn wiring(&self) -> Vec<(usize, usize)> {
        match &self.device_channel_indices {
            Some(indices) => indices
                .iter()
                .enumerate()
                .filter_map(|(contact, &ch)| usize::try_from(ch).ok().map(|ch| (contact, ch)))
                .collect(),
            None => (0..self.num_contacts()).map(|i| (i, i)).collect(),
        }
    }

    /// Shank id of a contact, if the probe declares shanks
    pub fn shank_of(&self, contact: usize) -> Option<&str> {
        self.shank_ids
            .get(contact)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// One tetrode: four contacts on a 10 µm circle at 0°, 90°, 180°, 270°
pub fn generate_tetrode() -> Probe {
    let r = TETRODE_RADIUS;
    Probe::with_circle_contacts(
        vec![[r, 0.0], [0.0, r], [-r, 0.0], [0.0, -r]],
        TETRODE_CONTACT_RADIUS,
    )
}

/// `n` tetrodes stacked vertically `spacing` µm apart, tetrode `i` wired to
/// device channels `4i..4i+4`
pub fn generate_tetrodes(n: usize, spacing: f64) -> ProbeGroup {
    let mut group = ProbeGroup::default();
    for i in 0..n {
        let mut tetrode = generate_tetrode();
        tetrode.move_by([0.0, i as f64 * spacing]);
        let first = (i * 4) as i64;
        tetrode.device_channel_indices = Some((first..first + 4).collect());
        group.add_probe(tetrode);
    }
    group
}

/// An ordered collection of probes attached to one recording device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeGroup {
    pub probes: Vec<Probe>,
}

/// On-disk probeinterface document
#[derive(Debug, Serialize, Deserialize)]
struct ProbeFile {
    #[serde(default)]
    specification: String,
    #[serde(default)]
    version: String,
    probes: Vec<Probe>,
}

impl ProbeGroup {
    /// Append a probe
    pub fn add_probe(&mut self, probe: Probe) {
        self.probes.push(probe);
    }

    /// Total number of contacts
    pub fn num_contacts(&self) -> usize {
        self.probes.iter().map(Probe::num_contacts).sum()
    }

    /// Highest wired device channel + 1
    pub fn num_channels(&self) -> usize {
        self.probes
            .iter()
            .flat_map(|p| p.wiring())
            .map(|(_, ch)| ch + 1)
            .max()
            .unwrap_or(0)
    }

    /// Merge all probes into one, recording the source probe as shank id
    /// where a probe declares no shanks of its own
    pub fn to_single_probe(&self) -> StashResult<Probe> {
        let first = self
            .probes
            .first()
            .ok_or_else(|| StashError::ProbeMismatch("probe group is empty".to_string()))?;

        let mut merged = Probe {
            annotations: first.annotations.clone(),
            contact_positions: vec![],
            contact_shapes: vec![],
            contact_shape_params: vec![],
            device_channel_indices: Some(vec![]),
            contact_ids: vec![],
            shank_ids: vec![],
            ..first.clone()
        };

        for (index, probe) in self.probes.iter().enumerate() {
            let n = probe.num_contacts();
            merged.contact_positions.extend(&probe.contact_positions);
            merged
                .contact_shapes
                .extend(pad(&probe.contact_shapes, n, "circle".to_string()));
            merged
                .contact_shape_params
                .extend(pad(&probe.contact_shape_params, n, ShapeParams::default()));
            merged.contact_ids.extend(pad(&probe.contact_ids, n, String::new()));

            let shanks = if probe.shank_ids.is_empty() {
                vec![index.to_string(); n]
            } else {
                pad(&probe.shank_ids, n, index.to_string())
            };
            merged.shank_ids.extend(shanks);

            let indices = match &probe.device_channel_indices {
                Some(indices) => pad(indices, n, -1),
                None => (0..n as i64).collect(),
            };
            if let Some(all) = merged.device_channel_indices.as_mut() {
                all.extend(indices);
            }
        }

        Ok(merged)
    }

    /// Parse a probeinterface JSON document
    pub fn from_json(content: &str) -> StashResult<Self> {
        let file: ProbeFile = serde_json::from_str(content)?;
        Ok(Self { probes: file.probes })
    }

    /// Serialize as a probeinterface JSON document
    pub fn to_json(&self) -> StashResult<String> {
        let file = ProbeFile {
            specification: SPECIFICATION.to_string(),
            version: FORMAT_VERSION.to_string(),
            probes: self.probes.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Load a probe file, choosing the format by extension (`.prb` or JSON)
    pub async fn from_file(path: &Path) -> StashResult<Self> {
        if !path.exists() {
            return Err(StashError::PathNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StashError::io(format!("reading probe file {}", path.display()), e))?;

        let parsed = if path.extension().is_some_and(|ext| ext == "prb") {
            super::prb::parse_prb(&content)
        } else {
            Self::from_json(&content)
        };

        parsed.map_err(|e| StashError::ProbeParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write a probe file, choosing the format by extension (`.prb` or JSON)
    pub async fn write_file(&self, path: &Path) -> StashResult<()> {
        let content = if path.extension().is_some_and(|ext| ext == "prb") {
            super::prb::write_prb(self)
        } else {
            self.to_json()?
        };
        fs::write(path, content)
            .await
            .map_err(|e| StashError::io(format!("writing probe file {}", path.display()), e))
    }
}

fn pad<T: Clone>(values: &[T], n: usize, fill: T) -> Vec<T> {
    let mut out: Vec<T> = values.iter().take(n).cloned().collect();
    out.resize(n, fill);
    out
}
