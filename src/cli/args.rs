//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sortstash - cached spike sorting pipeline
///
/// Preprocesses electrophysiology recordings, runs a spike sorter and
/// computes spike amplitudes, reusing stored results whenever the inputs
/// and configuration are unchanged.
#[derive(Parser, Debug)]
#[command(name = "sortstash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SORTSTASH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides cache.base_dir)
    #[arg(long, global = true, env = "SORTSTASH_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Skip local .sortstash.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cut a recording to N channels, attach its probe and cache it
    Preprocess(PreprocessArgs),

    /// Preprocess and spike-sort a recording
    Sort(SortArgs),

    /// Preprocess, sort and compute spike amplitudes
    Amplitudes(AmplitudesArgs),

    /// Print the recording mode from an Axona .set header
    Mode(ModeArgs),

    /// Generate or inspect probe layouts
    Probe(ProbeArgs),

    /// Manage cached artifacts
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Raw recording input shared by the processing commands
#[derive(Args, Debug, Clone)]
pub struct RecordingArgs {
    /// Raw interleaved int16 recording file
    pub input: PathBuf,

    /// Recording name used in cache entries (defaults to the file stem)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Channels per frame in the raw file
    #[arg(long, default_value = "32")]
    pub file_channels: usize,

    /// Channels to keep (defaults to all)
    #[arg(short = 'k', long)]
    pub channels: Option<usize>,

    /// Sampling rate in Hz
    #[arg(long, default_value = "48000")]
    pub sampling_rate: f64,

    /// µV per bit
    #[arg(long, default_value = "1.0")]
    pub gain: f64,

    /// Electrode type: tetrode, 8_tetrode, probe or "32 ch four shanks"
    #[arg(short, long, default_value = "tetrode")]
    pub electrode: String,

    /// Probe file for probe electrodes (overrides probe.probe_file)
    #[arg(long)]
    pub probe_file: Option<PathBuf>,
}

/// Arguments for the preprocess command
#[derive(Parser, Debug)]
pub struct PreprocessArgs {
    #[command(flatten)]
    pub recording: RecordingArgs,
}

/// Arguments for the sort command
#[derive(Parser, Debug)]
pub struct SortArgs {
    #[command(flatten)]
    pub recording: RecordingArgs,

    /// Label of the sorting entry, to keep several sortings apart
    #[arg(short, long, default_value = "sorting")]
    pub suffix: String,

    /// Run this external sorter command instead of the configured backend
    #[arg(long)]
    pub external: Option<String>,
}

/// Arguments for the amplitudes command
#[derive(Parser, Debug)]
pub struct AmplitudesArgs {
    #[command(flatten)]
    pub sort: SortArgs,

    /// Peak sign used to pick each unit's channel: neg, pos or both
    #[arg(long)]
    pub peak_sign: Option<String>,

    /// Report raw sample values instead of µV
    #[arg(long)]
    pub unscaled: bool,
}

/// Arguments for the mode command
#[derive(Parser, Debug)]
pub struct ModeArgs {
    /// Axona .set header file
    pub set_file: PathBuf,

    /// Read mode_ch_N by key instead of the fixed header position
    #[arg(long)]
    pub channel: Option<usize>,
}

/// Arguments for the probe command
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    #[command(subcommand)]
    pub action: ProbeAction,
}

/// Probe subcommands
#[derive(Subcommand, Debug)]
pub enum ProbeAction {
    /// Generate N tetrodes stacked vertically
    Tetrodes {
        /// Number of tetrodes
        count: usize,

        /// Vertical spacing in µm (default: from config)
        #[arg(long)]
        spacing: Option<f64>,

        /// Write the layout to a .json or .prb file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the contacts of a probe file
    Show {
        /// Probe file (defaults to probe.probe_file)
        file: Option<PathBuf>,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., cache.key_mode)
        key: String,
        /// Value to set
        value: String,
        /// Write to project-local .sortstash.toml instead of global config
        #[arg(long)]
        local: bool,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show cache location, size and entry states
    Info,

    /// Remove old entries and abandoned staging directories
    Gc {
        /// Remove entries older than N days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove one entry
    Remove {
        /// Entry directory name, as shown by `cache list`
        entry: String,
    },

    /// Remove every entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_preprocess() {
        let cli = Cli::parse_from([
            "sortstash",
            "preprocess",
            "session1.bin",
            "--file-channels",
            "64",
            "-k",
            "32",
            "--electrode",
            "32 ch four shanks",
        ]);
        match cli.command {
            Commands::Preprocess(args) => {
                assert_eq!(args.recording.input, PathBuf::from("session1.bin"));
                assert_eq!(args.recording.file_channels, 64);
                assert_eq!(args.recording.channels, Some(32));
                assert_eq!(args.recording.electrode, "32 ch four shanks");
                assert_eq!(args.recording.sampling_rate, 48000.0);
            }
            _ => panic!("expected Preprocess command"),
        }
    }

    #[test]
    fn cli_parses_sort_defaults() {
        let cli = Cli::parse_from(["sortstash", "sort", "rec.bin"]);
        match cli.command {
            Commands::Sort(args) => {
                assert_eq!(args.suffix, "sorting");
                assert!(args.external.is_none());
                assert_eq!(args.recording.electrode, "tetrode");
            }
            _ => panic!("expected Sort command"),
        }
    }

    #[test]
    fn cli_parses_amplitudes() {
        let cli = Cli::parse_from([
            "sortstash",
            "amplitudes",
            "rec.bin",
            "--suffix",
            "sorting2",
            "--peak-sign",
            "both",
            "--unscaled",
        ]);
        match cli.command {
            Commands::Amplitudes(args) => {
                assert_eq!(args.sort.suffix, "sorting2");
                assert_eq!(args.peak_sign.as_deref(), Some("both"));
                assert!(args.unscaled);
            }
            _ => panic!("expected Amplitudes command"),
        }
    }

    #[test]
    fn cli_parses_cache_gc() {
        let cli = Cli::parse_from(["sortstash", "cache", "gc", "--days", "7", "--dry-run"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Gc { days, dry_run },
            }) => {
                assert_eq!(days, Some(7));
                assert!(dry_run);
            }
            _ => panic!("expected Cache Gc command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "sortstash",
            "cache",
            "list",
            "-vv",
            "--cache-dir",
            "/scratch",
            "--no-local",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/scratch")));
        assert!(cli.no_local);
    }

    #[test]
    fn cli_parses_probe_tetrodes() {
        let cli = Cli::parse_from(["sortstash", "probe", "tetrodes", "8", "-o", "eight.prb"]);
        match cli.command {
            Commands::Probe(ProbeArgs {
                action: ProbeAction::Tetrodes { count, spacing, output },
            }) => {
                assert_eq!(count, 8);
                assert!(spacing.is_none());
                assert_eq!(output, Some(PathBuf::from("eight.prb")));
            }
            _ => panic!("expected Probe Tetrodes command"),
        }
    }

    #[test]
    fn cli_parses_completions() {
        let cli = Cli::parse_from(["sortstash", "completions", "bash"]);
        assert!(matches!(cli.command, Commands::Completions { .. }));
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
