//! Destructive operations confirm with the user before proceeding. The
//! trait keeps the prompt out of the strategies so `--force` and tests can
//! substitute an always-yes answer.

use std::io::{BufRead, Write};

use crate::error::StrategyError;

pub trait Confirm {
    /// Ask the user to confirm; `Ok(false)` means they declined.
    fn confirm(&self, title: &str, description: &str) -> Result<bool, StrategyError>;
}

/// Confirms on stderr/stdin. With `ACCESSIBLE` set in the environment the
/// prompt switches to a screen-reader-friendly typed answer instead of a
/// single-key default.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, title: &str, description: &str) -> Result<bool, StrategyError> {
        let accessible = std::env::var_os("ACCESSIBLE").is_some_and(|v| !v.is_empty());
        let mut err = std::io::stderr();
        if accessible {
            writeln!(err, "{title}")?;
            writeln!(err, "{description}")?;
            write!(err, "Type yes to confirm, anything else to cancel: ")?;
        } else {
            writeln!(err, "{title}")?;
            writeln!(err, "{description}")?;
            write!(err, "[y/N] ")?;
        }
        err.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let answer = line.trim().to_ascii_lowercase();
        if accessible {
            Ok(answer == "yes")
        } else {
            Ok(answer == "y" || answer == "yes")
        }
    }
}

/// Always confirms; used by `--force` and tests.
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _title: &str, _description: &str) -> Result<bool, StrategyError> {
        Ok(true)
    }
}
