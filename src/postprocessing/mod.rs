//! Post-processing extensions computed from a recording and its sorting

pub mod amplitudes;

pub use amplitudes::{
    compute_spike_amplitudes, AmplitudeParams, PeakSign, SpikeAmplitude, SpikeAmplitudes,
};
