//! Operator confirmation gate for irreversible operations.

use anyhow::{Context, Result};
use std::io::{self, Write};

/// Supplies the operator's answer to a destructive-action prompt. The caller
/// compares the answer against the required literal; any mismatch aborts the
/// run with no side effects.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> Result<String>;
}

/// Reads the answer from stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> Result<String> {
        print!("{prompt}");
        io::stdout().flush().context("flushing confirmation prompt")?;
        let mut line = String::new();
        io::stdin()
            .read_line(&mut line)
            .context("reading confirmation from stdin")?;
        Ok(line.trim().to_string())
    }
}

/// Canned answer, used by tests.
pub struct Scripted(pub String);

impl Confirm for Scripted {
    fn confirm(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}
