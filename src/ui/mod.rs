//! Terminal output for the CLI
//!
//! Uses `cliclack` and `indicatif` when attached to a terminal and falls
//! back to plain tagged lines under CI or batch schedulers.
//!
//! # Example
//!
//! ```rust,ignore
//! use sortstash::ui::{self, TaskSpinner, UiContext};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Preprocessing recording...");
//! // ... do work ...
//! spinner.stop("Preprocessed recording computed");
//!
//! ui::key_value(&ctx, "Channels", "32");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    key_value, key_value_status, remark, section, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{SorterProgress, TaskSpinner};
pub use prompts::confirm;
