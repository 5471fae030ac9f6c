//! Electrode type dispatch

use super::geometry::{generate_tetrodes, ProbeGroup};
use crate::config::ProbeConfig;
use crate::error::{StashError, StashResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};

/// Kind of electrode a recording was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectrodeType {
    /// Bundles of four wires
    Tetrode,
    /// Silicon probe described by a probe file
    Probe,
}

impl ElectrodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tetrode => "tetrode",
            Self::Probe => "probe",
        }
    }
}

impl FromStr for ElectrodeType {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "tetrode" | "8_tetrode" => Ok(Self::Tetrode),
            "probe" | "32 ch four shanks" => Ok(Self::Probe),
            other => Err(StashError::InvalidElectrodeType(other.to_string())),
        }
    }
}

impl fmt::Display for ElectrodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the probe layout of a recording comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum ProbeSource {
    /// Generated tetrodes stacked `spacing_um` apart
    Tetrodes { count: usize, spacing_um: f64 },
    /// A PRB or probeinterface JSON file
    File { path: PathBuf },
}

impl ProbeSource {
    /// Pick the probe source for an electrode type
    pub fn resolve(
        electrode: ElectrodeType,
        num_channels: usize,
        config: &ProbeConfig,
    ) -> StashResult<Self> {
        match electrode {
            ElectrodeType::Tetrode => {
                if num_channels % 4 != 0 {
                    warn!(
                        "{} channels is not a multiple of 4; trailing {} channel(s) get no tetrode",
                        num_channels,
                        num_channels % 4
                    );
                }
                Ok(Self::Tetrodes {
                    count: num_channels / 4,
                    spacing_um: config.tetrode_spacing_um,
                })
            }
            ElectrodeType::Probe => {
                let path = config
                    .probe_file
                    .clone()
                    .ok_or(StashError::ProbeFileMissing)?;
                Ok(Self::File { path })
            }
        }
    }

    /// Build or read the probe group
    pub async fn load(&self) -> StashResult<ProbeGroup> {
        match self {
            Self::Tetrodes { count, spacing_um } => {
                debug!("Generating {} tetrodes, {} um apart", count, spacing_um);
                Ok(generate_tetrodes(*count, *spacing_um))
            }
            Self::File { path } => {
                debug!("Reading probe file {}", path.display());
                ProbeGroup::from_file(path).await
            }
        }
    }
}

impl fmt::Display for ProbeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tetrodes { count, spacing_um } => {
                write!(f, "{} generated tetrodes ({} um spacing)", count, spacing_um)
            }
            Self::File { path } => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_legacy_names() {
        assert_eq!("tetrode".parse::<ElectrodeType>().unwrap(), ElectrodeType::Tetrode);
        assert_eq!("8_tetrode".parse::<ElectrodeType>().unwrap(), ElectrodeType::Tetrode);
        assert_eq!("probe".parse::<ElectrodeType>().unwrap(), ElectrodeType::Probe);
        assert_eq!(
            "32 ch four shanks".parse::<ElectrodeType>().unwrap(),
            ElectrodeType::Probe
        );
    }

    #[test]
    fn unknown_type_is_typed_error() {
        let err = "silicon".parse::<ElectrodeType>().unwrap_err();
        assert!(matches!(err, StashError::InvalidElectrodeType(ref s) if s == "silicon"));
        assert!(err.to_string().contains("Electrode type is set wrong"));
        assert!(err.hint().is_some());
    }

    #[tokio::test]
    async fn tetrode_source_floors_channel_count() {
        let config = ProbeConfig::default();
        let source = ProbeSource::resolve(ElectrodeType::Tetrode, 18, &config).unwrap();
        assert_eq!(
            source,
            ProbeSource::Tetrodes {
                count: 4,
                spacing_um: 300.0
            }
        );
        let group = source.load().await.unwrap();
        assert_eq!(group.num_channels(), 16);
    }

    #[test]
    fn probe_source_needs_file() {
        let config = ProbeConfig::default();
        let err = ProbeSource::resolve(ElectrodeType::Probe, 32, &config).unwrap_err();
        assert!(matches!(err, StashError::ProbeFileMissing));
    }

    #[tokio::test]
    async fn probe_source_reads_prb() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shank.prb");
        std::fs::write(
            &path,
            "channel_groups = {0: {'channels': [1, 0], 'geometry': {0: (0, 0), 1: (0, 25)}}}",
        )
        .unwrap();

        let config = ProbeConfig {
            probe_file: Some(path.clone()),
            ..ProbeConfig::default()
        };
        let source = ProbeSource::resolve(ElectrodeType::Probe, 2, &config).unwrap();
        assert_eq!(source, ProbeSource::File { path });

        let group = source.load().await.unwrap();
        assert_eq!(group.probes[0].contact_positions, vec![[0.0, 25.0], [0.0, 0.0]]);
    }
}
