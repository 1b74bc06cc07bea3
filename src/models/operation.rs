use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassificationMode {
    #[serde(rename = "none")]
    None,
    #[default]
    #[serde(rename = "name-only")]
    NameOnly,
    #[serde(rename = "name-content", alias = "name+content")]
    NameAndContent,
}

impl ClassificationMode {
    pub fn uses_classifier(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn reads_content(self) -> bool {
        matches!(self, Self::NameAndContent)
    }
}

impl std::fmt::Display for ClassificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::NameOnly => write!(f, "name-only"),
            Self::NameAndContent => write!(f, "name+content"),
        }
    }
}

impl std::str::FromStr for ClassificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "name-only" | "name_only" | "name" => Ok(Self::NameOnly),
            "name+content" | "name-content" | "name_content" | "content" => {
                Ok(Self::NameAndContent)
            }
            _ => Err(format!("unknown classification mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FolderCreation,
    Move,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FolderCreation => write!(f, "folder_creation"),
            Self::Move => write!(f, "move"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Moved { folder_id: String },
    Skipped,
    Failed { kind: FailureKind, reason: String },
}

impl ExecutionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub file_id: String,
    pub file_name: String,
    pub target_label: String,
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedFolder {
    pub label: String,
    pub folder_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub session_id: String,
    pub dry_run: bool,
    pub started_at: String,
    pub finished_at: String,
    pub folders_created: Vec<CreatedFolder>,
    pub results: Vec<ExecutionResult>,
}

impl ExecutionReport {
    pub fn moved_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ExecutionOutcome::Moved { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == ExecutionOutcome::Skipped)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_failed()).count()
    }

    pub fn failed_file_ids(&self) -> HashSet<String> {
        self.results
            .iter()
            .filter(|r| r.outcome.is_failed())
            .map(|r| r.file_id.clone())
            .collect()
    }

    pub fn summary_line(&self) -> String {
        let prefix = if self.dry_run { "Would move" } else { "Moved" };
        let mut line = format!(
            "{prefix} {} file(s) into {} new folder(s), skipped {}",
            self.moved_count(),
            self.folders_created.len(),
            self.skipped_count()
        );
        let failed = self.failed_count();
        if failed > 0 {
            line.push_str(&format!(", {failed} failed"));
        }
        line.push('.');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, outcome: ExecutionOutcome) -> ExecutionResult {
        ExecutionResult {
            file_id: id.to_string(),
            file_name: format!("{id}.pdf"),
            target_label: "Invoices".to_string(),
            outcome,
        }
    }

    #[test]
    fn mode_round_trips_through_display() {
        for mode in [
            ClassificationMode::None,
            ClassificationMode::NameOnly,
            ClassificationMode::NameAndContent,
        ] {
            assert_eq!(mode.to_string().parse::<ClassificationMode>(), Ok(mode));
        }
        assert_eq!(
            "name-content".parse::<ClassificationMode>(),
            Ok(ClassificationMode::NameAndContent)
        );
        assert!("smart".parse::<ClassificationMode>().is_err());
    }

    #[test]
    fn report_counts_each_outcome() {
        let report = ExecutionReport {
            session_id: "s".to_string(),
            dry_run: false,
            started_at: String::new(),
            finished_at: String::new(),
            folders_created: vec![CreatedFolder {
                label: "Invoices".to_string(),
                folder_id: "f1".to_string(),
            }],
            results: vec![
                result(
                    "a",
                    ExecutionOutcome::Moved {
                        folder_id: "f1".to_string(),
                    },
                ),
                result("b", ExecutionOutcome::Skipped),
                result(
                    "c",
                    ExecutionOutcome::Failed {
                        kind: FailureKind::Move,
                        reason: "denied".to_string(),
                    },
                ),
            ],
        };

        assert_eq!(report.moved_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failed_file_ids(), HashSet::from(["c".to_string()]));
        assert_eq!(
            report.summary_line(),
            "Moved 1 file(s) into 1 new folder(s), skipped 1, 1 failed."
        );
    }
}
