//! Output formatting for CLI commands.
//!
//! Human-readable tables by default, JSON with `--json`.

use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print rows in the chosen mode
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

/// Shorten `value` to `max` characters, marking the cut
pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let kept: String = value.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
