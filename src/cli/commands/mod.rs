//! CLI command implementations

pub mod amplitudes;
pub mod cache;
pub mod completions;
pub mod config;
mod input;
pub mod mode;
pub mod preprocess;
pub mod probe;
pub mod sort;

pub use amplitudes::execute as amplitudes;
pub use cache::execute as cache;
pub use completions::execute as completions;
pub use config::execute as config;
pub use mode::execute as mode;
pub use preprocess::execute as preprocess;
pub use probe::execute as probe;
pub use sort::execute as sort;
