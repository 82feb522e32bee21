//! Run report and error message rendering.

use std::fmt;
use std::time::Duration;

use fleet_core::RunSummary;

/// Error detail lines kept in a report; the last is replaced by a pointer
/// to the logs when there are more.
pub const MAX_ERROR_DETAILS: usize = 10;

/// Everything a run report shows.
#[derive(Debug, Clone)]
pub struct RunReport<'a> {
    /// Heading, e.g. "Hibernation Report".
    pub title: &'a str,
    pub run_id: &'a str,
    pub runtime: Duration,
    /// Filter name and value pairs, in display order.
    pub filters: Vec<(&'a str, String)>,
    pub summary: &'a RunSummary,
}

impl RunReport<'_> {
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary;

        writeln!(f, "### {}\n", self.title)?;
        writeln!(f, "Run ID: {}", wrap_inline_code(self.run_id))?;
        writeln!(f, "Runtime: {:.2?}", self.runtime)?;
        if !self.filters.is_empty() {
            f.write_str("Filters:\n")?;
            for (name, value) in &self.filters {
                writeln!(f, " - {name}: {value}")?;
            }
        }

        f.write_str("\n#### Results\n| Type | Count |\n| -- | -- |\n")?;
        let applied_label = if summary.dry_run {
            "Actions Applied (dry run)"
        } else {
            "Actions Applied"
        };
        let rows = [
            ("Installations Considered", summary.considered),
            ("Actions Approved", summary.approved),
            (applied_label, summary.completed),
            ("Skipped (Not Eligible)", summary.skipped.not_eligible),
            ("Skipped (Locked)", summary.skipped.locked),
            ("Skipped (Metrics Unavailable)", summary.skipped.metrics_unavailable),
            ("Skipped (User Count)", summary.skipped.population_exempt),
            ("Relock Failures", summary.relock_failures),
        ];
        for (label, count) in rows {
            writeln!(f, "| {label} | {count} |")?;
        }

        if !summary.errors.is_empty() {
            let details = trim_errors(&summary.errors).join("\n");
            write!(f, "\n#### Errors\n{details}\n")?;
        }
        Ok(())
    }
}

fn trim_errors(errors: &[String]) -> Vec<String> {
    if errors.len() <= MAX_ERROR_DETAILS {
        return errors.to_vec();
    }
    let mut kept = errors[..MAX_ERROR_DETAILS - 1].to_vec();
    kept.push("Review logs for additional error details".to_string());
    kept
}

/// Message sent when a run fails.
pub fn render_error(run_id: &str, error: &str) -> String {
    format!(
        "### Fleet Controller Encountered an Error\n\nRun ID: {}\n\nError: {}",
        wrap_inline_code(run_id),
        wrap_code_block(error)
    )
}

pub fn wrap_inline_code(s: &str) -> String {
    format!("`{s}`")
}

pub fn wrap_code_block(s: &str) -> String {
    format!("\n```\n{s}\n```\n")
}
