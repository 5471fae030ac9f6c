//! Sort command - preprocess and spike-sort a recording

use super::input::Input;
use crate::cache::Cached;
use crate::cli::args::SortArgs;
use crate::config::Config;
use crate::error::StashResult;
use crate::pipeline;
use crate::probe::ElectrodeType;
use crate::recording::Recording;
use crate::sorting::{create_sorter, ExternalSorter, ProgressSink, Sorter, Sorting};
use crate::ui::{self, SorterProgress, UiContext};
use std::sync::Arc;

/// Execute the sort command
pub async fn execute(args: SortArgs, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();
    let input = Input::open(&args.recording, config).await?;
    let recording = input.preprocess(&ctx).await?;
    let sorting = run_sort(&ctx, &input, &recording, &args, config).await?;

    print_units(&ctx, &sorting, recording.value.duration_secs());
    Ok(())
}

/// Select the sorter and run the sorting stage with a progress bar
pub(super) async fn run_sort(
    ctx: &UiContext,
    input: &Input,
    recording: &Cached<Recording>,
    args: &SortArgs,
    config: &Config,
) -> StashResult<Cached<Sorting>> {
    let sorter: Box<dyn Sorter> = match &args.external {
        Some(command) => Box::new(ExternalSorter::new(command, config.sorter.args.clone())),
        None => create_sorter(&config.sorter)?,
    };
    let params = match input.electrode {
        ElectrodeType::Tetrode => &config.sorter.tetrode,
        ElectrodeType::Probe => &config.sorter.probe,
    };

    let progress = Arc::new(SorterProgress::new(ctx, sorter.name()));
    let sink: ProgressSink = {
        let progress = Arc::clone(&progress);
        Arc::new(move |line: String| progress.on_line(line))
    };

    let result = pipeline::sort(
        &input.store,
        &recording.value,
        &input.name,
        input.electrode,
        &args.suffix,
        sorter.as_ref(),
        params,
        Some(sink),
    )
    .await;
    progress.finish();

    let sorting = result?;
    ui::step_ok_detail(
        ctx,
        &format!(
            "Sorted {} with {} ({})",
            input.name,
            sorter.name(),
            sorting.outcome
        ),
        &sorting.path.display().to_string(),
    );
    Ok(sorting)
}

fn print_units(ctx: &UiContext, sorting: &Cached<Sorting>, duration_secs: f64) {
    let sorting = &sorting.value;
    if sorting.units.is_empty() {
        ui::step_warn(ctx, "No units found");
        return;
    }

    ui::section(ctx, "Units");
    println!("  {:<6} {:<7} {:>8} {:>10}", "UNIT", "GROUP", "SPIKES", "RATE (Hz)");
    for unit in &sorting.units {
        println!(
            "  {:<6} {:<7} {:>8} {:>10.2}",
            unit.id,
            unit.group,
            unit.frames.len(),
            firing_rate(unit.frames.len(), duration_secs)
        );
    }
    ui::key_value(ctx, "Total spikes", &sorting.num_spikes().to_string());
}

fn firing_rate(spikes: usize, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        spikes as f64 / duration_secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firing_rate_over_duration() {
        assert_eq!(firing_rate(50, 10.0), 5.0);
        assert_eq!(firing_rate(50, 0.0), 0.0);
    }
}
