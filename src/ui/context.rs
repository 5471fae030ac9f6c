//! Interactive vs. batch detection

use std::io::IsTerminal;

/// Environment variables set by common CI systems and batch schedulers
const BATCH_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "BUILDKITE",
    "SLURM_JOB_ID",
    "PBS_JOBID",
    "LSB_JOBID",
];

/// Decides how output is rendered and whether prompts are shown
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    auto_yes: bool,
}

impl UiContext {
    /// Detect the current environment
    ///
    /// Spinners and prompts need a terminal on both stdin and stdout, and
    /// are disabled under CI and cluster job schedulers.
    pub fn detect() -> Self {
        let terminal = std::io::stdout().is_terminal() && std::io::stdin().is_terminal();
        let dumb = std::env::var("TERM").is_ok_and(|t| t == "dumb");
        let batch = BATCH_VARS.iter().any(|var| std::env::var_os(var).is_some());

        Self {
            interactive: terminal && !dumb && !batch,
            auto_yes: false,
        }
    }

    /// Plain output, prompts answered with their default
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_yes: false,
        }
    }

    /// Answer every prompt with yes
    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    /// Whether to draw spinners, bars and colors
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}
