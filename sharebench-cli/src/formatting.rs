//! Output Formatting
//!
//! Human-readable summaries of sweep reports and plans.

use sharebench_core::Precision;
use sharebench_runner::{SweepReport, SweepStatus};

/// Format a sweep report for terminal display
pub fn format_human_output(report: &SweepReport) -> String {
    let meta = &report.meta;
    let mut output = String::new();

    output.push('\n');
    output.push_str(&format!(
        "Sharebench Sweep: {} on {} ({})\n",
        meta.mode, meta.device, meta.device_model
    ));
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    for section in &report.precisions {
        output.push_str(&format!(
            "Precision: {}  planned: {:?}\n",
            section.precision, section.planned
        ));
        output.push_str(&"-".repeat(60));
        output.push('\n');

        if let Some(error) = &section.error {
            output.push_str(&format!("  ✗ planning failed: {}\n", error));
        }

        for record in &section.measurements {
            let icon = if record.succeeded { "✓" } else { "✗" };
            output.push_str(&format!(
                "  {} B = {:<5} {:>10.1} ms  {}\n",
                icon,
                record.batch_size,
                record.elapsed_ms,
                record.outdir.display()
            ));
            if let Some(error) = &record.error {
                output.push_str(&format!("      error: {}\n", error));
            }
        }

        let skipped = section.skipped();
        if !skipped.is_empty() && section.error.is_none() {
            output.push_str(&format!("  ⊘ not run: {:?}\n", skipped));
        }
        output.push('\n');
    }

    let measured = report.measurements().count();
    let failed = report.measurements().filter(|(_, m)| !m.succeeded).count();
    let status = match report.status {
        SweepStatus::Passed => "PASSED",
        SweepStatus::Failed => "FAILED",
        SweepStatus::Running => "INCOMPLETE",
    };
    output.push_str(&format!(
        "Summary: {} ({} measured, {} failed, {} precision(s) run)\n",
        status,
        measured,
        failed,
        report.precisions.len()
    ));
    output
}

/// Format planned batch sizes per precision
pub fn format_plan(mode: &str, plans: &[(Precision, Vec<u32>)]) -> String {
    let mut output = format!("Sharebench Plan ({}):\n", mode);
    for (precision, plan) in plans {
        output.push_str(&format!("├── {}: {:?}\n", precision, plan));
    }
    output
}
