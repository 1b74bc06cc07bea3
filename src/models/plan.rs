use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::file_ref::{FileRef, FolderRef};

/// Equality key for folder labels: trimmed, whitespace collapsed, case folded.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Human-facing spelling of a label. Keeps casing, collapses whitespace and
/// replaces path separators so the label is usable as a single folder name.
pub fn display_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['/', '\\'], "-")
}

/// Whether a display label can name a single visible folder.
pub fn is_usable_label(display: &str) -> bool {
    !display.trim().is_empty() && !display.starts_with('.') && !display.contains('\0')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FolderTarget {
    Existing { folder_id: String, name: String },
    Proposed { label: String },
}

impl FolderTarget {
    pub fn proposed(label: impl AsRef<str>) -> Self {
        Self::Proposed {
            label: display_label(label.as_ref()),
        }
    }

    pub fn existing(folder: &FolderRef) -> Self {
        Self::Existing {
            folder_id: folder.id.clone(),
            name: folder.name.clone(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Existing { name, .. } => name,
            Self::Proposed { label } => label,
        }
    }

    pub fn is_proposed(&self) -> bool {
        matches!(self, Self::Proposed { .. })
    }

    /// Normalized label when this target is a proposed folder.
    pub fn proposed_key(&self) -> Option<String> {
        match self {
            Self::Proposed { label } => Some(normalize_label(label)),
            Self::Existing { .. } => None,
        }
    }

    fn group_key(&self) -> String {
        match self {
            Self::Existing { folder_id, .. } => format!("existing:{folder_id}"),
            Self::Proposed { label } => format!("proposed:{}", normalize_label(label)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    #[default]
    Pending,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOrigin {
    /// Fallback target chosen because classification is off.
    Default,
    Classified,
    /// Fallback target chosen because classification failed; flagged for review.
    Fallback,
    /// Set by the reviewer; never overwritten by reclassification.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("unknown confidence: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub file: FileRef,
    pub target: FolderTarget,
    pub status: AssignmentStatus,
    pub origin: AssignmentOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Assignment {
    pub fn new(file: FileRef, target: FolderTarget, origin: AssignmentOrigin) -> Self {
        Self {
            file,
            target,
            status: AssignmentStatus::Pending,
            origin,
            confidence: None,
            reasoning: None,
            note: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == AssignmentStatus::Skipped
    }

    pub fn is_flagged(&self) -> bool {
        self.origin == AssignmentOrigin::Fallback
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub total_files: usize,
    pub pending_files: usize,
    pub skipped_files: usize,
    pub new_folders: usize,
    pub existing_folders: usize,
    pub total_folders: usize,
    pub flagged_files: usize,
}

/// Assignments that share one logical destination, for display.
#[derive(Debug)]
pub struct TargetGroup<'a> {
    pub label: String,
    pub is_new: bool,
    pub assignments: Vec<&'a Assignment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    assignments: Vec<Assignment>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    folders: Vec<FolderRef>,
    fallback_label: String,
    /// Spellings of proposed labels renamed away, by normalized key.
    #[serde(skip)]
    retired_spellings: HashMap<String, String>,
}

impl PartialEq for Plan {
    fn eq(&self, other: &Self) -> bool {
        self.assignments == other.assignments
            && self.folders == other.folders
            && self.fallback_label == other.fallback_label
    }
}

impl Plan {
    /// Builds a plan keyed by file id. A repeated id keeps its first assignment.
    pub fn new(
        assignments: Vec<Assignment>,
        folders: Vec<FolderRef>,
        fallback_label: impl Into<String>,
    ) -> Self {
        let mut kept = Vec::with_capacity(assignments.len());
        let mut index = HashMap::with_capacity(assignments.len());
        for assignment in assignments {
            if index.contains_key(&assignment.file.id) {
                tracing::warn!(file_id = %assignment.file.id, "duplicate file id in scan; keeping first");
                continue;
            }
            index.insert(assignment.file.id.clone(), kept.len());
            kept.push(assignment);
        }
        Self {
            assignments: kept,
            index,
            folders,
            fallback_label: fallback_label.into(),
            retired_spellings: HashMap::new(),
        }
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub(crate) fn assignments_mut(&mut self) -> impl Iterator<Item = &mut Assignment> {
        self.assignments.iter_mut()
    }

    pub fn get(&self, file_id: &str) -> Option<&Assignment> {
        self.index.get(file_id).map(|&idx| &self.assignments[idx])
    }

    pub(crate) fn get_mut(&mut self, file_id: &str) -> Option<&mut Assignment> {
        let idx = *self.index.get(file_id)?;
        self.assignments.get_mut(idx)
    }

    pub fn contains_file(&self, file_id: &str) -> bool {
        self.index.contains_key(file_id)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn folders(&self) -> &[FolderRef] {
        &self.folders
    }

    pub fn folder(&self, folder_id: &str) -> Option<&FolderRef> {
        self.folders.iter().find(|folder| folder.id == folder_id)
    }

    pub fn fallback_label(&self) -> &str {
        &self.fallback_label
    }

    /// Remembers the spelling `key` had before it was renamed away.
    pub(crate) fn retire_spelling(&mut self, key: String, spelling: String) {
        self.retired_spellings.insert(key, spelling);
    }

    /// Takes back the spelling a renamed-away label had, if one was recorded.
    pub(crate) fn revive_spelling(&mut self, key: &str) -> Option<String> {
        self.retired_spellings.remove(key)
    }

    /// Spelling currently used in the plan for a normalized proposed label.
    pub fn proposed_spelling(&self, key: &str) -> Option<&str> {
        self.assignments.iter().find_map(|a| match &a.target {
            FolderTarget::Proposed { label } if normalize_label(label) == key => {
                Some(label.as_str())
            }
            _ => None,
        })
    }

    /// Distinct proposed labels in first-appearance order.
    pub fn proposed_labels(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.assignments
            .iter()
            .filter_map(|a| match &a.target {
                FolderTarget::Proposed { label } if seen.insert(normalize_label(label)) => {
                    Some(label.as_str())
                }
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut new_keys = HashSet::new();
        let mut existing_ids = HashSet::new();
        let mut pending = 0;
        for assignment in self.assignments.iter().filter(|a| !a.is_skipped()) {
            pending += 1;
            match &assignment.target {
                FolderTarget::Proposed { label } => {
                    new_keys.insert(normalize_label(label));
                }
                FolderTarget::Existing { folder_id, .. } => {
                    existing_ids.insert(folder_id.clone());
                }
            }
        }
        PlanSummary {
            total_files: self.assignments.len(),
            pending_files: pending,
            skipped_files: self.assignments.len() - pending,
            new_folders: new_keys.len(),
            existing_folders: existing_ids.len(),
            total_folders: new_keys.len() + existing_ids.len(),
            flagged_files: self.assignments.iter().filter(|a| a.is_flagged()).count(),
        }
    }

    /// Groups assignments by destination: new folders first, then existing,
    /// each sorted by label. Members keep plan order.
    pub fn groups(&self) -> Vec<TargetGroup<'_>> {
        let mut grouped: BTreeMap<(bool, String, String), TargetGroup<'_>> = BTreeMap::new();
        let mut key_of: HashMap<String, (bool, String, String)> = HashMap::new();
        for assignment in &self.assignments {
            let group_key = assignment.target.group_key();
            let sort_key = key_of
                .entry(group_key.clone())
                .or_insert_with(|| {
                    (
                        !assignment.target.is_proposed(),
                        assignment.target.label().to_lowercase(),
                        group_key,
                    )
                })
                .clone();
            grouped
                .entry(sort_key)
                .or_insert_with(|| TargetGroup {
                    label: assignment.target.label().to_string(),
                    is_new: assignment.target.is_proposed(),
                    assignments: Vec::new(),
                })
                .assignments
                .push(assignment);
        }
        grouped.into_values().collect()
    }
}
