//! Probe layouts
//!
//! Tetrode generation, probeinterface JSON and PRB files, and the mapping
//! from an electrode type to the probe group attached during preprocessing.

pub mod electrode;
pub mod geometry;
pub mod prb;

pub use electrode::{ElectrodeType, ProbeSource};
pub use geometry::{
    generate_tetrode, generate_tetrodes, Probe, ProbeGroup, ShapeParams,
    DEFAULT_TETRODE_SPACING, TETRODE_CONTACT_RADIUS, TETRODE_RADIUS,
};
pub use prb::{parse_prb, write_prb};
