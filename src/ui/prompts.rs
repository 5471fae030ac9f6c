//! Confirmation prompt with non-interactive fallback

use super::context::UiContext;
use crate::error::{StashError, StashResult};

/// Ask a yes/no question
///
/// Returns `true` under auto-yes and `default` when not attached to a
/// terminal.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> StashResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }

    if !ctx.is_interactive() {
        return Ok(default);
    }

    // cliclack blocks on stdin
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| StashError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| StashError::io("reading confirmation", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirm_auto_yes() {
        let ctx = UiContext::non_interactive().with_auto_yes(true);
        assert!(confirm(&ctx, "Remove 3 entries?", false).await.unwrap());
    }

    #[tokio::test]
    async fn confirm_non_interactive_default() {
        let ctx = UiContext::non_interactive();
        assert!(confirm(&ctx, "Remove?", true).await.unwrap());
        assert!(!confirm(&ctx, "Remove?", false).await.unwrap());
    }
}
