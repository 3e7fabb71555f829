//! Markdown rendering of one pipeline run.

use std::fmt::Write;

use contracts::PipelineRun;
use lab_core::report::{decision_breakdown, flatten_frame};

pub fn pipeline_markdown(run: &PipelineRun, all_atoms: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} at tick {}\n", run.agent_id, run.tick);

    for frame in &run.frames {
        let _ = writeln!(
            out,
            "## {} {} ({} atoms, {} new, {} overridden)\n",
            frame.stage,
            frame.title,
            frame.stats.atom_count,
            frame.stats.new_count,
            frame.stats.overridden_count
        );
        for warning in &frame.warnings {
            let _ = writeln!(out, "> warning: {warning}");
        }
        if !frame.warnings.is_empty() {
            out.push('\n');
        }

        let records = flatten_frame(frame, all_atoms);
        if records.is_empty() {
            continue;
        }
        out.push_str("| id | origin | magnitude | confidence | uses |\n");
        out.push_str("|---|---|---:|---:|---|\n");
        for record in records {
            let _ = writeln!(
                out,
                "| `{}` | {} | {:.3} | {:.2} | {} |",
                record.id,
                record.origin.as_str(),
                record.magnitude,
                record.confidence,
                record.used_atom_ids.join(", ")
            );
        }
        out.push('\n');
    }

    if let Some(failure) = &run.failure {
        let _ = writeln!(out, "## No action this tick\n");
        let _ = writeln!(out, "{}: {}", failure.name, failure.message);
        for line in &failure.stack {
            let _ = writeln!(out, "- {line}");
        }
        out.push('\n');
    }

    if let Some(report) = &run.decision {
        let _ = writeln!(
            out,
            "## Decision (temperature {:.2}, chosen {})\n",
            report.temperature,
            report.best_id().unwrap_or("nothing")
        );
        out.push_str("| rank | candidate | q_raw | penalty | q | cost | sampled | chosen |\n");
        out.push_str("|---:|---|---:|---:|---:|---:|---|---|\n");
        for row in decision_breakdown(report) {
            let _ = writeln!(
                out,
                "| {} | `{}` | {:.3} | {:.3} | {:.3} | {:.3} | {} | {} |",
                row.rank,
                row.candidate_id,
                row.q_raw,
                row.penalty,
                row.q,
                row.cost,
                if row.sampled { "yes" } else { "" },
                if row.chosen { "**yes**" } else { "" }
            );
        }
        for warning in &report.warnings {
            let _ = writeln!(out, "\n> warning: {warning}");
        }
    }

    out
}
