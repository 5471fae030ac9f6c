//! Amplitudes command - preprocess, sort and compute spike amplitudes

use super::input::Input;
use super::sort::run_sort;
use crate::cli::args::AmplitudesArgs;
use crate::config::Config;
use crate::error::StashResult;
use crate::pipeline;
use crate::postprocessing::{AmplitudeParams, PeakSign, SpikeAmplitudes};
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the amplitudes command
pub async fn execute(args: AmplitudesArgs, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();
    let params = amplitude_params(&args, config)?;

    let input = Input::open(&args.sort.recording, config).await?;
    let recording = input.preprocess(&ctx).await?;
    let sorting = run_sort(&ctx, &input, &recording, &args.sort, config).await?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Computing spike amplitudes...");
    let amplitudes =
        match pipeline::spike_amplitudes(&input.store, &recording.value, &sorting, &params).await {
            Ok(amplitudes) => amplitudes,
            Err(e) => {
                spinner.stop_error("Spike amplitudes failed");
                return Err(e);
            }
        };
    spinner.stop(&format!("Spike amplitudes ({})", amplitudes.outcome));

    ui::key_value(&ctx, "Entry", &amplitudes.path.display().to_string());
    print_summary(&ctx, &amplitudes.value);
    Ok(())
}

/// Command-line flags over the `[postprocessing]` section
fn amplitude_params(args: &AmplitudesArgs, config: &Config) -> StashResult<AmplitudeParams> {
    let peak_sign = match &args.peak_sign {
        Some(sign) => sign.parse::<PeakSign>()?,
        None => config.postprocessing.peak_sign,
    };
    Ok(AmplitudeParams {
        peak_sign,
        return_scaled: config.postprocessing.return_scaled && !args.unscaled,
        ..AmplitudeParams::default()
    })
}

fn print_summary(ctx: &UiContext, amplitudes: &SpikeAmplitudes) {
    let unit = if amplitudes.params.return_scaled {
        "µV"
    } else {
        "raw"
    };

    ui::section(ctx, "Amplitudes");
    println!(
        "  {:<6} {:<8} {:>8} {:>12}",
        "UNIT",
        "CHANNEL",
        "SPIKES",
        format!("MEDIAN ({})", unit)
    );
    for (unit_id, values) in amplitudes.by_unit() {
        let channel = amplitudes
            .extremum_channels
            .get(&unit_id)
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<6} {:<8} {:>8} {:>12.1}",
            unit_id,
            channel,
            values.len(),
            median(&values)
        );
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{Cli, Commands};
    use clap::Parser;

    fn parse(extra: &[&str]) -> AmplitudesArgs {
        let mut argv = vec!["sortstash", "amplitudes", "rec.bin"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Amplitudes(args) => args,
            _ => panic!("expected Amplitudes command"),
        }
    }

    #[test]
    fn params_follow_config_without_flags() {
        let mut config = Config::default();
        config.postprocessing.peak_sign = PeakSign::Pos;

        let params = amplitude_params(&parse(&[]), &config).unwrap();
        assert_eq!(params.peak_sign, PeakSign::Pos);
        assert!(params.return_scaled);
    }

    #[test]
    fn flags_override_config() {
        let params =
            amplitude_params(&parse(&["--peak-sign", "both", "--unscaled"]), &Config::default())
                .unwrap();
        assert_eq!(params.peak_sign, PeakSign::Both);
        assert!(!params.return_scaled);
    }

    #[test]
    fn invalid_peak_sign_is_rejected() {
        let result = amplitude_params(&parse(&["--peak-sign", "up"]), &Config::default());
        assert!(result.is_err());
    }

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }
}
