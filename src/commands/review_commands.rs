//! Line-oriented review surface: renders plans and reports, and drives the
//! approve / edit / cancel loop over any reader and writer.

use std::io::{BufRead, Write};

use crate::error::AppError;
use crate::models::operation::{ExecutionOutcome, ExecutionReport};
use crate::models::plan::{Assignment, Confidence, FolderTarget, Plan};
use crate::services::review_service;

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approved,
    Cancelled,
    /// Rerun the classifier over assignments the reviewer has not set by hand.
    Reclassify,
}

fn confidence_marker(assignment: &Assignment) -> &'static str {
    if assignment.is_skipped() {
        return "-";
    }
    if assignment.is_flagged() {
        return "!";
    }
    match assignment.confidence {
        Some(Confidence::High) | None => " ",
        Some(Confidence::Medium) => "~",
        Some(Confidence::Low) => "?",
    }
}

pub fn display_plan<W: Write>(plan: &Plan, out: &mut W) -> std::io::Result<()> {
    let summary = plan.summary();
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(out, " ORGANIZATION PLAN")?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(out, "  Files in plan:           {}", summary.total_files)?;
    writeln!(out, "  Skipped:                 {}", summary.skipped_files)?;
    writeln!(out, "  New folders to create:   {}", summary.new_folders)?;
    writeln!(out, "  Existing folders to use: {}", summary.existing_folders)?;
    if summary.flagged_files > 0 {
        writeln!(out, "  Needs a look (!):        {}", summary.flagged_files)?;
    }
    writeln!(out)?;

    for group in plan.groups() {
        let tag = if group.is_new { "[new]" } else { "[existing]" };
        writeln!(out, "  {tag} {}", group.label)?;
        for assignment in group.assignments {
            write!(
                out,
                "      {} {}",
                confidence_marker(assignment),
                assignment.file.name
            )?;
            if assignment.is_skipped() {
                write!(out, " (skipped)")?;
            }
            if let Some(note) = &assignment.note {
                write!(out, " ({note})")?;
            }
            writeln!(out)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

pub fn display_report<W: Write>(report: &ExecutionReport, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    for result in &report.results {
        match &result.outcome {
            ExecutionOutcome::Moved { .. } => {
                writeln!(out, "  ok    {} -> {}", result.file_name, result.target_label)?
            }
            ExecutionOutcome::Skipped => writeln!(out, "  skip  {}", result.file_name)?,
            ExecutionOutcome::Failed { kind, reason } => writeln!(
                out,
                "  fail  {} -> {} [{kind}] {reason}",
                result.file_name, result.target_label
            )?,
        }
    }
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    writeln!(out, " {}", report.summary_line())?;
    Ok(())
}

/// Reads answers from `input` and writes prompts to `output`. End of input
/// reads as `None`.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn output(&mut self) -> &mut W {
        &mut self.output
    }

    pub fn ask(&mut self, prompt: &str) -> std::io::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    pub fn confirm(&mut self, prompt: &str) -> std::io::Result<bool> {
        let answer = self.ask(&format!("{prompt} (yes/no): "))?;
        Ok(matches!(
            answer.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        ))
    }

    /// Asks for a 1-based index into a list of `len` entries. `0`, blank and
    /// invalid answers give `None`.
    fn pick(&mut self, prompt: &str, len: usize) -> std::io::Result<Option<usize>> {
        let Some(answer) = self.ask(prompt)? else {
            return Ok(None);
        };
        match answer.parse::<usize>() {
            Ok(n) if (1..=len).contains(&n) => Ok(Some(n - 1)),
            Ok(0) => Ok(None),
            _ => {
                if !answer.is_empty() {
                    writeln!(self.output, "  Invalid choice: {answer}")?;
                }
                Ok(None)
            }
        }
    }
}

fn list_files<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    plan: &Plan,
    filter: impl Fn(&Assignment) -> bool,
) -> std::io::Result<Vec<String>> {
    let mut ids = Vec::new();
    for assignment in plan.assignments().iter().filter(|a| filter(a)) {
        ids.push(assignment.file.id.clone());
        writeln!(
            prompter.output(),
            "    [{}] {} -> {}",
            ids.len(),
            assignment.file.name,
            assignment.target.label()
        )?;
    }
    Ok(ids)
}

fn report_edit<W: Write>(out: &mut W, result: Result<String, AppError>) -> std::io::Result<()> {
    match result {
        Ok(message) => writeln!(out, "  {message}"),
        Err(e) => writeln!(out, "  Could not apply edit: {e}"),
    }
}

fn rename_interactive<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    plan: &mut Plan,
) -> std::io::Result<()> {
    let labels: Vec<String> = plan.proposed_labels().into_iter().map(str::to_string).collect();
    if labels.is_empty() {
        writeln!(prompter.output(), "  No new folders to rename.")?;
        return Ok(());
    }
    for (i, label) in labels.iter().enumerate() {
        writeln!(prompter.output(), "    [{}] {label}", i + 1)?;
    }
    let Some(idx) = prompter.pick("  Folder number to rename (0 to cancel): ", labels.len())? else {
        return Ok(());
    };
    let old = &labels[idx];
    let Some(new_name) = prompter.ask(&format!("  New name for '{old}': "))? else {
        return Ok(());
    };
    let result = review_service::rename_target(plan, old, &new_name)
        .map(|n| format!("Renamed '{old}' to '{}' ({n} file(s))", new_name.trim()));
    report_edit(prompter.output(), result)
}

fn set_skip_interactive<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    plan: &mut Plan,
    skipping: bool,
) -> std::io::Result<()> {
    let ids = list_files(prompter, plan, |a| a.is_skipped() != skipping)?;
    if ids.is_empty() {
        let what = if skipping { "pending" } else { "skipped" };
        writeln!(prompter.output(), "  No {what} files.")?;
        return Ok(());
    }
    let verb = if skipping { "skip" } else { "restore" };
    let prompt = format!("  File number to {verb} (0 to cancel): ");
    let Some(idx) = prompter.pick(&prompt, ids.len())? else {
        return Ok(());
    };
    let file_id = &ids[idx];
    let result = if skipping {
        review_service::skip(plan, file_id).map(|_| format!("Skipped '{file_id}'"))
    } else {
        review_service::unskip(plan, file_id).map(|_| format!("Restored '{file_id}'"))
    };
    report_edit(prompter.output(), result)
}

fn move_interactive<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    plan: &mut Plan,
) -> std::io::Result<()> {
    let ids = list_files(prompter, plan, |_| true)?;
    if ids.is_empty() {
        return Ok(());
    }
    let Some(idx) = prompter.pick("  File number to move (0 to cancel): ", ids.len())? else {
        return Ok(());
    };
    let file_id = ids[idx].clone();

    let mut destinations: Vec<FolderTarget> = plan
        .proposed_labels()
        .into_iter()
        .map(FolderTarget::proposed)
        .collect();
    destinations.extend(plan.folders().iter().map(FolderTarget::existing));
    writeln!(prompter.output(), "  Destinations:")?;
    for (i, target) in destinations.iter().enumerate() {
        let tag = if target.is_proposed() { " (new)" } else { "" };
        writeln!(prompter.output(), "    [{}] {}{tag}", i + 1, target.label())?;
    }
    writeln!(prompter.output(), "    [N] Create new folder")?;

    let Some(answer) = prompter.ask("  Destination (number or N): ")? else {
        return Ok(());
    };
    let target = if answer.eq_ignore_ascii_case("n") {
        let Some(name) = prompter.ask("  New folder name: ")? else {
            return Ok(());
        };
        FolderTarget::Proposed { label: name }
    } else {
        match answer.parse::<usize>() {
            Ok(n) if (1..=destinations.len()).contains(&n) => destinations[n - 1].clone(),
            _ => {
                writeln!(prompter.output(), "  Invalid destination: {answer}")?;
                return Ok(());
            }
        }
    };
    let result = review_service::reassign(plan, &file_id, target).map(|_| {
        let label = plan
            .get(&file_id)
            .map(|a| a.target.label().to_string())
            .unwrap_or_default();
        format!("Moved '{file_id}' to '{label}'")
    });
    report_edit(prompter.output(), result)
}

fn print_menu<W: Write>(out: &mut W, allow_reclassify: bool) -> std::io::Result<()> {
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    writeln!(out, " OPTIONS:")?;
    writeln!(out, "   [A] Approve and execute this plan")?;
    writeln!(out, "   [R] Rename a new folder")?;
    writeln!(out, "   [S] Skip a file")?;
    writeln!(out, "   [U] Unskip a file")?;
    writeln!(out, "   [M] Move a file to a different folder")?;
    if allow_reclassify {
        writeln!(out, "   [K] Reclassify files not moved by hand")?;
    }
    writeln!(out, "   [C] Cancel (make no changes)")?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))
}

/// Runs review rounds until the reviewer approves, cancels, or asks for a
/// reclassification. End of input counts as cancel.
pub fn review_loop<R: BufRead, W: Write>(
    plan: &mut Plan,
    prompter: &mut Prompter<R, W>,
    allow_reclassify: bool,
) -> std::io::Result<ReviewDecision> {
    loop {
        display_plan(plan, prompter.output())?;
        print_menu(prompter.output(), allow_reclassify)?;
        let Some(choice) = prompter.ask("  Your choice: ")? else {
            return Ok(ReviewDecision::Cancelled);
        };
        match choice.to_ascii_uppercase().as_str() {
            "A" => {
                if prompter.confirm("  Proceed with these changes?")? {
                    tracing::info!(files = plan.summary().pending_files, "plan approved");
                    return Ok(ReviewDecision::Approved);
                }
                writeln!(prompter.output(), "  Returning to review.")?;
            }
            "R" => rename_interactive(prompter, plan)?,
            "S" => set_skip_interactive(prompter, plan, true)?,
            "U" => set_skip_interactive(prompter, plan, false)?,
            "M" => move_interactive(prompter, plan)?,
            "K" if allow_reclassify => return Ok(ReviewDecision::Reclassify),
            "C" => {
                if prompter.confirm("  Cancel and make no changes?")? {
                    tracing::info!("review cancelled");
                    return Ok(ReviewDecision::Cancelled);
                }
            }
            "" => {}
            other => writeln!(prompter.output(), "  Unknown option: {other}")?,
        }
    }
}
