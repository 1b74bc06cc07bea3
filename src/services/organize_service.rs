use std::collections::HashMap;

use crate::error::AppError;
use crate::models::file_ref::{FileRef, FolderRef};
use crate::models::plan::{
    display_label, is_usable_label, normalize_label, Assignment, AssignmentOrigin, FolderTarget, Plan,
};
use crate::services::classifier_service::Classification;

pub const DEFAULT_FALLBACK_LABEL: &str = "Unsorted";

/// Normalized-key lookup from labels to targets. Existing folders win over
/// proposals; the first spelling seen for a proposed key is reused for every
/// later label with the same key.
#[derive(Debug, Default)]
pub struct LabelTable {
    existing: HashMap<String, FolderRef>,
    proposed: HashMap<String, String>,
}

impl LabelTable {
    pub fn new(folders: &[FolderRef]) -> Self {
        let mut existing = HashMap::new();
        for folder in folders {
            let key = normalize_label(&folder.name);
            if key.is_empty() {
                continue;
            }
            existing.entry(key).or_insert_with(|| folder.clone());
        }
        Self {
            existing,
            proposed: HashMap::new(),
        }
    }

    /// Seeds the table with the proposed labels already present in a plan.
    pub fn from_plan(plan: &Plan) -> Self {
        let mut table = Self::new(plan.folders());
        for label in plan.proposed_labels() {
            table.register_proposed(label);
        }
        table
    }

    fn register_proposed(&mut self, label: &str) -> Option<FolderTarget> {
        let display = display_label(label);
        if !is_usable_label(&display) {
            return None;
        }
        let key = normalize_label(&display);
        let spelling = self.proposed.entry(key).or_insert(display).clone();
        Some(FolderTarget::Proposed { label: spelling })
    }

    /// Target for a classifier label, or `None` when it cannot name a folder.
    pub fn resolve(&mut self, label: &str) -> Option<FolderTarget> {
        let display = display_label(label);
        if !is_usable_label(&display) {
            return None;
        }
        let key = normalize_label(&display);
        if let Some(folder) = self.existing.get(&key) {
            return Some(FolderTarget::existing(folder));
        }
        self.register_proposed(label)
    }

    /// The fallback is always a proposed folder, never an existing one.
    pub fn fallback(&mut self, fallback_label: &str) -> FolderTarget {
        self.register_proposed(fallback_label)
            .unwrap_or_else(|| FolderTarget::proposed(DEFAULT_FALLBACK_LABEL))
    }
}

fn fallback_assignment(
    file: FileRef,
    table: &mut LabelTable,
    fallback_label: &str,
    reason: &AppError,
) -> Assignment {
    tracing::warn!(file = %file.name, error = %reason, "classification failed; using fallback folder");
    let mut assignment = Assignment::new(
        file,
        table.fallback(fallback_label),
        AssignmentOrigin::Fallback,
    );
    assignment.note = Some(reason.to_string());
    assignment
}

fn classified_assignment(
    file: FileRef,
    table: &mut LabelTable,
    fallback_label: &str,
    outcome: Result<Classification, AppError>,
) -> Assignment {
    let classification = match outcome {
        Ok(classification) => classification,
        Err(err) => return fallback_assignment(file, table, fallback_label, &err),
    };
    let Some(target) = table.resolve(&classification.label) else {
        let err = AppError::Classification(format!(
            "unusable folder label {:?} for '{}'",
            classification.label, file.name
        ));
        return fallback_assignment(file, table, fallback_label, &err);
    };
    let mut assignment = Assignment::new(file, target, AssignmentOrigin::Classified);
    assignment.confidence = classification.confidence;
    assignment.reasoning = classification.reasoning;
    assignment
}

/// Plan for the no-classifier path: every file goes to the fallback folder.
pub fn build_unclassified_plan(
    files: Vec<FileRef>,
    folders: Vec<FolderRef>,
    fallback_label: &str,
) -> Plan {
    let mut table = LabelTable::new(&folders);
    let target = table.fallback(fallback_label);
    let assignments = files
        .into_iter()
        .map(|file| Assignment::new(file, target.clone(), AssignmentOrigin::Default))
        .collect();
    Plan::new(assignments, folders, fallback_label)
}

/// Assembles a plan from per-file classification outcomes given in file order.
/// Failed or empty classifications fall back and are flagged.
pub fn build_classified_plan(
    files: Vec<FileRef>,
    folders: Vec<FolderRef>,
    fallback_label: &str,
    outcomes: Vec<Result<Classification, AppError>>,
) -> Plan {
    let mut table = LabelTable::new(&folders);
    let mut outcomes = outcomes.into_iter();
    let assignments = files
        .into_iter()
        .map(|file| {
            let outcome = outcomes.next().unwrap_or_else(|| {
                Err(AppError::Classification("no classification result".to_string()))
            });
            classified_assignment(file, &mut table, fallback_label, outcome)
        })
        .collect();
    Plan::new(assignments, folders, fallback_label)
}

/// Replaces targets of non-manual assignments with fresh classification
/// outcomes keyed by file id. Statuses are kept; manual assignments are sticky.
/// Returns how many assignments were updated.
pub fn apply_reclassification(
    plan: &mut Plan,
    mut outcomes: HashMap<String, Result<Classification, AppError>>,
) -> usize {
    let mut table = LabelTable::from_plan(plan);
    let fallback_label = plan.fallback_label().to_string();
    let mut updated = 0;
    for assignment in plan.assignments_mut() {
        if assignment.origin == AssignmentOrigin::Manual {
            continue;
        }
        let Some(outcome) = outcomes.remove(&assignment.file.id) else {
            continue;
        };
        let fresh = classified_assignment(
            assignment.file.clone(),
            &mut table,
            &fallback_label,
            outcome,
        );
        assignment.target = fresh.target;
        assignment.origin = fresh.origin;
        assignment.confidence = fresh.confidence;
        assignment.reasoning = fresh.reasoning;
        assignment.note = fresh.note;
        updated += 1;
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::AssignmentStatus;

    fn files(names: &[&str]) -> Vec<FileRef> {
        names.iter().map(|n| FileRef::new(*n, *n)).collect()
    }

    fn ok(label: &str) -> Result<Classification, AppError> {
        Ok(Classification::label(label))
    }

    #[test]
    fn case_variants_collapse_to_first_spelling() {
        let plan = build_classified_plan(
            files(&["A.pdf", "B.pdf", "C.txt"]),
            Vec::new(),
            DEFAULT_FALLBACK_LABEL,
            vec![ok("Invoices"), ok("  invoices "), ok("Notes")],
        );

        let labels: Vec<_> = plan.assignments().iter().map(|a| a.target.label()).collect();
        assert_eq!(labels, vec!["Invoices", "Invoices", "Notes"]);
        assert_eq!(plan.proposed_labels(), vec!["Invoices", "Notes"]);
        assert_eq!(plan.summary().new_folders, 2);
    }

    #[test]
    fn labels_matching_existing_folders_become_existing_targets() {
        let folders = vec![FolderRef::new("id-resume", "Resume")];
        let plan = build_classified_plan(
            files(&["cv.pdf"]),
            folders,
            DEFAULT_FALLBACK_LABEL,
            vec![ok("RESUME")],
        );

        assert_eq!(
            plan.get("cv.pdf").unwrap().target,
            FolderTarget::Existing {
                folder_id: "id-resume".to_string(),
                name: "Resume".to_string(),
            }
        );
    }

    #[test]
    fn failed_and_empty_classifications_fall_back_and_are_flagged() {
        let plan = build_classified_plan(
            files(&["A.pdf", "B.pdf", "C.txt"]),
            Vec::new(),
            "Unsorted",
            vec![
                ok("Invoices"),
                Err(AppError::Timeout(
                    "classify 'B.pdf'".to_string(),
                    std::time::Duration::from_secs(30),
                )),
                ok("   "),
            ],
        );

        assert_eq!(plan.len(), 3);
        let b = plan.get("B.pdf").unwrap();
        assert_eq!(b.target, FolderTarget::proposed("Unsorted"));
        assert!(b.is_flagged());
        assert!(b.note.as_deref().unwrap().contains("timed out"));
        assert!(plan.get("C.txt").unwrap().is_flagged());
        assert!(!plan.get("A.pdf").unwrap().is_flagged());
        assert_eq!(plan.summary().flagged_files, 2);
    }

    #[test]
    fn labels_differing_after_fifty_chars_are_separate_folders() {
        let prefix = "Quarterly Financial Statements And Supporting Docs";
        let plan = build_classified_plan(
            files(&["a.pdf", "b.pdf"]),
            Vec::new(),
            DEFAULT_FALLBACK_LABEL,
            vec![ok(&format!("{prefix} Alpha")), ok(&format!("{prefix} Beta"))],
        );

        assert_eq!(plan.summary().new_folders, 2);
        assert_eq!(
            plan.get("b.pdf").unwrap().target.label(),
            format!("{prefix} Beta")
        );
    }

    #[test]
    fn dot_labels_fall_back_and_are_flagged() {
        let plan = build_classified_plan(
            files(&["a", "b", "c"]),
            Vec::new(),
            "Unsorted",
            vec![ok(".."), ok("."), ok(".hidden")],
        );

        for id in ["a", "b", "c"] {
            let assignment = plan.get(id).unwrap();
            assert_eq!(assignment.target, FolderTarget::proposed("Unsorted"));
            assert!(assignment.is_flagged());
        }
        assert!(plan.get("a").unwrap().note.as_deref().unwrap().contains("unusable folder label"));
    }

    #[test]
    fn missing_outcomes_fall_back_instead_of_dropping_files() {
        let plan = build_classified_plan(
            files(&["a", "b"]),
            Vec::new(),
            "Unsorted",
            vec![ok("Notes")],
        );
        assert_eq!(plan.len(), 2);
        assert!(plan.get("b").unwrap().is_flagged());
    }

    #[test]
    fn unclassified_plan_uses_one_proposed_fallback() {
        let plan = build_unclassified_plan(
            files(&["a", "b"]),
            vec![FolderRef::new("u", "Unsorted")],
            "Unsorted",
        );
        assert!(plan
            .assignments()
            .iter()
            .all(|a| a.target == FolderTarget::proposed("Unsorted")
                && a.origin == AssignmentOrigin::Default));
    }

    #[test]
    fn reclassification_skips_manual_and_keeps_status() {
        let mut plan = build_classified_plan(
            files(&["a", "b", "c"]),
            Vec::new(),
            "Unsorted",
            vec![ok("Notes"), ok("Notes"), ok("Notes")],
        );
        {
            let b = plan.get_mut("b").unwrap();
            b.origin = AssignmentOrigin::Manual;
            b.target = FolderTarget::proposed("Keep");
        }
        plan.get_mut("c").unwrap().status = AssignmentStatus::Skipped;

        let outcomes = HashMap::from([
            ("a".to_string(), ok("notes archive")),
            ("b".to_string(), ok("Other")),
            ("c".to_string(), ok("NOTES")),
        ]);
        let updated = apply_reclassification(&mut plan, outcomes);

        assert_eq!(updated, 2);
        assert_eq!(plan.get("a").unwrap().target.label(), "notes archive");
        assert_eq!(plan.get("b").unwrap().target.label(), "Keep");
        let c = plan.get("c").unwrap();
        assert_eq!(c.target.label(), "Notes");
        assert_eq!(c.status, AssignmentStatus::Skipped);
    }
}
