use crate::error::AppError;
use crate::models::plan::{
    display_label, is_usable_label, normalize_label, AssignmentOrigin, AssignmentStatus, FolderTarget, Plan,
};

fn proposed_spelling_excluding<'a>(plan: &'a Plan, key: &str, file_id: &str) -> Option<&'a str> {
    plan.assignments()
        .iter()
        .filter(|a| a.file.id != file_id)
        .find_map(|a| match &a.target {
            FolderTarget::Proposed { label } if normalize_label(label) == key => {
                Some(label.as_str())
            }
            _ => None,
        })
}

fn canonical_target(plan: &Plan, file_id: &str, target: FolderTarget) -> Result<FolderTarget, AppError> {
    match target {
        FolderTarget::Existing { folder_id, .. } => {
            if plan.contains_file(&folder_id) {
                return Err(AppError::InvalidTarget(format!(
                    "'{folder_id}' is a file, not a folder"
                )));
            }
            let folder = plan.folder(&folder_id).ok_or_else(|| {
                AppError::InvalidTarget(format!("unknown folder id '{folder_id}'"))
            })?;
            Ok(FolderTarget::existing(folder))
        }
        FolderTarget::Proposed { label } => {
            let display = display_label(&label);
            if !is_usable_label(&display) {
                return Err(AppError::InvalidTarget(format!(
                    "{:?} cannot name a folder",
                    label.trim()
                )));
            }
            let key = normalize_label(&display);
            let spelling = proposed_spelling_excluding(plan, &key, file_id)
                .map(str::to_string)
                .unwrap_or(display);
            Ok(FolderTarget::Proposed { label: spelling })
        }
    }
}

/// Renames every proposed folder whose normalized label is `old_label`,
/// skipped assignments included. Colliding with another proposed label merges
/// into it; renaming back to a label renamed away earlier restores its old
/// spelling. Returns the number of assignments touched.
pub fn rename_target(plan: &mut Plan, old_label: &str, new_label: &str) -> Result<usize, AppError> {
    let old_key = normalize_label(old_label);
    let new_display = display_label(new_label);
    if !is_usable_label(&new_display) {
        return Err(AppError::InvalidTarget(format!(
            "{:?} cannot name a folder",
            new_label.trim()
        )));
    }
    let new_key = normalize_label(&new_display);
    let Some(old_spelling) = plan.proposed_spelling(&old_key).map(str::to_string) else {
        return Err(AppError::TargetNotFound(old_label.trim().to_string()));
    };

    let spelling = if new_key == old_key {
        new_display
    } else {
        let current = plan.proposed_spelling(&new_key).map(str::to_string);
        let spelling = match current {
            Some(current) => current,
            None => plan.revive_spelling(&new_key).unwrap_or(new_display),
        };
        plan.retire_spelling(old_key.clone(), old_spelling);
        spelling
    };

    let mut renamed = 0;
    for assignment in plan.assignments_mut() {
        if assignment.target.proposed_key().as_deref() == Some(old_key.as_str()) {
            assignment.target = FolderTarget::Proposed {
                label: spelling.clone(),
            };
            renamed += 1;
        }
    }
    tracing::debug!(from = %old_label, to = %spelling, renamed, "renamed proposed folder");
    Ok(renamed)
}

/// Points `file_id` at `target`, clearing any skip. Marks the assignment manual.
pub fn reassign(plan: &mut Plan, file_id: &str, target: FolderTarget) -> Result<(), AppError> {
    if !plan.contains_file(file_id) {
        return Err(AppError::FileNotFound(file_id.to_string()));
    }
    let target = canonical_target(plan, file_id, target)?;
    let assignment = plan
        .get_mut(file_id)
        .ok_or_else(|| AppError::FileNotFound(file_id.to_string()))?;
    assignment.target = target;
    assignment.status = AssignmentStatus::Pending;
    assignment.origin = AssignmentOrigin::Manual;
    assignment.confidence = None;
    assignment.reasoning = None;
    assignment.note = None;
    Ok(())
}

fn set_status(plan: &mut Plan, file_id: &str, status: AssignmentStatus) -> Result<(), AppError> {
    let assignment = plan
        .get_mut(file_id)
        .ok_or_else(|| AppError::FileNotFound(file_id.to_string()))?;
    assignment.status = status;
    Ok(())
}

pub fn skip(plan: &mut Plan, file_id: &str) -> Result<(), AppError> {
    set_status(plan, file_id, AssignmentStatus::Skipped)
}

pub fn unskip(plan: &mut Plan, file_id: &str) -> Result<(), AppError> {
    set_status(plan, file_id, AssignmentStatus::Pending)
}
