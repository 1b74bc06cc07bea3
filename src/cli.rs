use std::path::PathBuf;

use clap::Parser;

use crate::config::{ClassifierBackend, OrganizerConfig};
use crate::models::operation::ClassificationMode;

/// Propose folders for loose files, review the plan, then apply it
#[derive(Debug, Parser)]
#[command(name = "drive-organizer")]
#[command(about = "Review-first organizer for loose files", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory whose loose files are organized (defaults to the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Classification mode: none, name-only or name-content
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<ClassificationMode>,

    /// Classifier backend: keyword or gemini
    #[arg(long, value_name = "BACKEND")]
    pub classifier: Option<ClassifierBackend>,

    /// Folder for files that could not be classified
    #[arg(long, value_name = "LABEL")]
    pub fallback: Option<String>,

    /// Maximum concurrent classifier and storage calls
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Show what would happen without touching any files
    #[arg(long)]
    pub dry_run: bool,

    /// Approve the plan without interactive review
    #[arg(short = 'y', long = "yes")]
    pub auto_approve: bool,

    /// Path to configuration file
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Flags win over file and environment settings.
    pub fn apply_to(&self, config: &mut OrganizerConfig) {
        if let Some(root) = &self.root {
            config.root = Some(root.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(backend) = self.classifier {
            config.classifier.backend = backend;
        }
        if let Some(label) = &self.fallback {
            config.fallback_label = label.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
    }
}
