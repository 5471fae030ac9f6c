//! Preprocess command - cut, attach the probe and cache a recording

use super::input::Input;
use crate::cli::args::PreprocessArgs;
use crate::config::Config;
use crate::error::StashResult;
use crate::ui::{self, UiContext};

/// Execute the preprocess command
pub async fn execute(args: PreprocessArgs, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();
    let input = Input::open(&args.recording, config).await?;
    let cached = input.preprocess(&ctx).await?;
    let recording = &cached.value;

    ui::key_value(&ctx, "Entry", &cached.path.display().to_string());
    ui::key_value(&ctx, "Electrode", input.electrode.as_str());
    ui::key_value(&ctx, "Probe", &input.probe.to_string());
    ui::key_value(&ctx, "Channels", &recording.num_channels().to_string());
    ui::key_value(&ctx, "Groups", &recording.split_by_group().len().to_string());
    ui::key_value(
        &ctx,
        "Duration",
        &format!(
            "{:.1} s at {} Hz",
            recording.duration_secs(),
            recording.sampling_frequency()
        ),
    );

    if input.num_channels > recording.num_channels() {
        ui::step_warn_hint(
            &ctx,
            &format!(
                "{} of {} channels are not wired to the probe and were dropped",
                input.num_channels - recording.num_channels(),
                input.num_channels
            ),
            "check the channel count or the probe file",
        );
    }

    Ok(())
}
