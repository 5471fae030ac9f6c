//! External sorter commands
//!
//! The command is invoked as
//! `<command> [args...] <recording dir> <output dir> <params.json>` and must
//! leave a `sorting.json` in the output directory. Stdout lines are forwarded
//! to the progress sink; stderr is kept for error reports.

use super::sorter::{SortContext, Sorter};
use super::{Sorting, SORTING_FILE};
use crate::cache::Artifact;
use crate::error::{StashError, StashResult};
use crate::recording::Recording;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Parameters file handed to the sorter
pub const PARAMS_FILE: &str = "params.json";

/// Max number of stderr lines kept in error messages
const STDERR_TAIL_LINES: usize = 50;

/// A sorter run as a subprocess
#[derive(Debug, Clone)]
pub struct ExternalSorter {
    command: String,
    args: Vec<String>,
}

impl ExternalSorter {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn resolve_command(&self) -> Option<PathBuf> {
        let candidate = Path::new(&self.command);
        if candidate.components().count() > 1 {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(&self.command))
            .find(|p| p.is_file())
    }

    /// Persisted recording directory, saving a copy under `output_dir` when
    /// the recording is not already on disk in saved form
    async fn recording_dir(recording: &Recording, output_dir: &Path) -> StashResult<PathBuf> {
        if let Some(dir) = recording.persisted_dir() {
            return Ok(dir.to_path_buf());
        }
        let dir = output_dir.join("recording");
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StashError::io(format!("creating {}", dir.display()), e))?;
        recording.save(&dir).await?;
        Ok(dir)
    }
}

#[async_trait]
impl Sorter for ExternalSorter {
    fn name(&self) -> &str {
        &self.command
    }

    fn identity(&self) -> serde_json::Value {
        serde_json::json!({ "command": self.command, "args": self.args })
    }

    async fn is_available(&self) -> bool {
        self.resolve_command().is_some()
    }

    async fn run(&self, recording: &Recording, ctx: &SortContext) -> StashResult<Sorting> {
        let output_dir = &ctx.output_dir;
        fs::create_dir_all(output_dir)
            .await
            .map_err(|e| StashError::io(format!("creating {}", output_dir.display()), e))?;

        let recording_dir = Self::recording_dir(recording, output_dir).await?;
        let params_path = output_dir.join(PARAMS_FILE);
        fs::write(&params_path, serde_json::to_string_pretty(&ctx.params)?)
            .await
            .map_err(|e| StashError::io(format!("writing {}", params_path.display()), e))?;

        debug!(
            "Running {} {:?} {} {} {}",
            self.command,
            self.args,
            recording_dir.display(),
            output_dir.display(),
            params_path.display()
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(&recording_dir)
            .arg(output_dir)
            .arg(&params_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StashError::SorterNotAvailable(self.command.clone())
                } else {
                    StashError::command_failed(&self.command, e)
                }
            })?;

        let stderr = stream_child_output(&mut child, ctx).await;
        let status = child
            .wait()
            .await
            .map_err(|e| StashError::command_failed(&self.command, e))?;

        if !status.success() {
            return Err(StashError::SorterFailed {
                sorter: self.command.clone(),
                code: status.code().unwrap_or(-1),
                stderr: stderr.join("\n"),
            });
        }

        Sorting::from_file(&output_dir.join(SORTING_FILE)).await
    }
}

/// Forward stdout lines to the progress sink and keep the last
/// `STDERR_TAIL_LINES` stderr lines
///
/// Lines are split on raw bytes so output that is not UTF-8 keeps the pipes
/// drained.
async fn stream_child_output(child: &mut tokio::process::Child, ctx: &SortContext) -> Vec<String> {
    let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return stderr_tail.into();
    };

    let mut stdout_reader = BufReader::new(stdout).split(b'\n');
    let mut stderr_reader = BufReader::new(stderr).split(b'\n');
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        tokio::select! {
            segment = stdout_reader.next_segment(), if !stdout_done => {
                match segment {
                    Ok(Some(bytes)) => ctx.report(decode_line(&bytes)),
                    _ => stdout_done = true,
                }
            }
            segment = stderr_reader.next_segment(), if !stderr_done => {
                match segment {
                    Ok(Some(bytes)) => {
                        let line = decode_line(&bytes);
                        debug!("sorter: {}", line);
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line);
                    }
                    _ => stderr_done = true,
                }
            }
        }
    }

    stderr_tail.into()
}

fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    line.strip_suffix('\r').unwrap_or(&line).to_string()
}
