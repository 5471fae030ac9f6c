//! Probe command - generate tetrode layouts or inspect probe files

use crate::cli::args::{ProbeAction, ProbeArgs};
use crate::config::Config;
use crate::error::{StashError, StashResult};
use crate::probe::{generate_tetrodes, ProbeGroup};
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the probe command
pub async fn execute(args: ProbeArgs, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();

    match args.action {
        ProbeAction::Tetrodes {
            count,
            spacing,
            output,
        } => {
            if count == 0 {
                return Err(StashError::User("tetrode count must be positive".to_string()));
            }
            let spacing = spacing.unwrap_or(config.probe.tetrode_spacing_um);
            let group = generate_tetrodes(count, spacing);

            match output {
                Some(path) => {
                    group.write_file(&path).await?;
                    ui::step_ok_detail(
                        &ctx,
                        &format!("Wrote {} tetrodes ({} channels)", count, group.num_channels()),
                        &path.display().to_string(),
                    );
                }
                None => println!("{}", group.to_json()?),
            }
        }
        ProbeAction::Show { file } => {
            let path = file
                .or_else(|| config.probe.probe_file.clone())
                .ok_or(StashError::ProbeFileMissing)?;
            let group = ProbeGroup::from_file(&path).await?;
            show_group(&ctx, &path, &group);
        }
    }

    Ok(())
}

fn show_group(ctx: &UiContext, path: &Path, group: &ProbeGroup) {
    ui::key_value(ctx, "File", &path.display().to_string());
    ui::key_value(ctx, "Probes", &group.probes.len().to_string());
    ui::key_value(ctx, "Contacts", &group.num_contacts().to_string());
    ui::key_value(ctx, "Channels", &group.num_channels().to_string());

    for (index, probe) in group.probes.iter().enumerate() {
        ui::section(ctx, &format!("Probe {}", index));
        println!(
            "  {:<8} {:<8} {:>9} {:>9}  {}",
            "CONTACT", "CHANNEL", "X (um)", "Y (um)", "SHANK"
        );
        let wiring: std::collections::BTreeMap<usize, usize> =
            probe.wiring().into_iter().collect();
        for (contact, [x, y]) in probe.contact_positions.iter().enumerate() {
            let channel = wiring
                .get(&contact)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<8} {:<8} {:>9.1} {:>9.1}  {}",
                contact,
                channel,
                x,
                y,
                probe.shank_of(contact).unwrap_or("-")
            );
        }
    }
}
