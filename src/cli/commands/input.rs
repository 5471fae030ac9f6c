//! Recording input shared by preprocess, sort and amplitudes

use crate::cache::{ArtifactStore, Cached};
use crate::cli::args::RecordingArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{StashError, StashResult};
use crate::pipeline;
use crate::probe::{ElectrodeType, ProbeSource};
use crate::recording::Recording;
use crate::ui::{TaskSpinner, UiContext};
use tracing::debug;

/// An opened raw recording plus everything needed to preprocess it
pub struct Input {
    pub store: ArtifactStore,
    pub raw: Recording,
    pub name: String,
    pub electrode: ElectrodeType,
    pub num_channels: usize,
    pub probe: ProbeSource,
}

/// Artifact store in effect for `config`
pub fn open_store(config: &Config) -> ArtifactStore {
    ArtifactStore::with_options(
        ConfigManager::cache_dir(config),
        config.cache.store_options(),
    )
}

impl Input {
    /// Validate the arguments and open the raw file
    pub async fn open(args: &RecordingArgs, config: &Config) -> StashResult<Self> {
        let electrode: ElectrodeType = args.electrode.parse()?;

        let name = match &args.name {
            Some(name) => name.clone(),
            None => args
                .input
                .file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
                .ok_or_else(|| {
                    StashError::User(format!(
                        "cannot derive a recording name from {}; pass --name",
                        args.input.display()
                    ))
                })?,
        };

        let raw =
            Recording::from_binary(&args.input, args.file_channels, args.sampling_rate, args.gain)
                .await?;
        let num_channels = args.channels.unwrap_or(args.file_channels);

        let mut probe_config = config.probe.clone();
        if let Some(path) = &args.probe_file {
            probe_config.probe_file = Some(path.clone());
        }
        let probe = ProbeSource::resolve(electrode, num_channels, &probe_config)?;
        debug!("{}: {} channels, probe from {}", name, num_channels, probe);

        Ok(Self {
            store: open_store(config),
            raw,
            name,
            electrode,
            num_channels,
            probe,
        })
    }

    /// Run the preprocessing stage behind a spinner
    pub async fn preprocess(&self, ctx: &UiContext) -> StashResult<Cached<Recording>> {
        let mut spinner = TaskSpinner::new(ctx);
        spinner.start(&format!("Preprocessing {}...", self.name));

        match pipeline::preprocess(
            &self.store,
            &self.raw,
            &self.name,
            self.electrode,
            self.num_channels,
            &self.probe,
        )
        .await
        {
            Ok(cached) => {
                spinner.stop(&format!("Preprocessed {} ({})", self.name, cached.outcome));
                Ok(cached)
            }
            Err(e) => {
                spinner.stop_error(&format!("Preprocessing {} failed", self.name));
                Err(e)
            }
        }
    }
}
