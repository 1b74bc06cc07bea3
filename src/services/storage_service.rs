use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::file_ref::{FileRef, FolderRef};

pub const DEFAULT_SNIPPET_CHARS: usize = 500;

const FORBIDDEN_NAME_PATTERNS: &[&str] = &["/", "\\", "\0", "\n", "\r"];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "yaml", "yml", "toml", "xml", "html", "htm",
    "log", "rst", "tex", "ini", "rs", "py", "js", "ts", "java", "c", "h", "cpp", "go", "sh",
];

/// Backend holding the loose files and their destination folders.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list_loose_files(&self) -> Result<Vec<FileRef>, AppError>;

    async fn list_folders(&self) -> Result<Vec<FolderRef>, AppError>;

    /// Creates a folder and returns its backend id. Called at most once per
    /// logical label by the executor; duplicate names are the backend's business.
    async fn create_folder(&self, name: &str) -> Result<String, AppError>;

    /// Moves a loose file into a folder. A move whose caller timed out may
    /// still land, so a repeat of a move that already happened must succeed.
    async fn move_file(&self, file_id: &str, folder_id: &str) -> Result<(), AppError>;

    async fn read_snippet(
        &self,
        _file: &FileRef,
        _max_chars: usize,
    ) -> Result<Option<String>, AppError> {
        Ok(None)
    }
}

pub fn compact_snippet(raw: &str, max_chars: usize) -> Option<String> {
    let compact = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.is_empty() {
        return None;
    }
    Some(compact.chars().take(max_chars).collect())
}

/// Rejects names that would escape the storage root or nest folders.
pub fn validate_entry_name(name: &str) -> Result<(), AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Storage("name is empty".to_string()));
    }
    for pattern in FORBIDDEN_NAME_PATTERNS {
        if trimmed.contains(pattern) {
            return Err(AppError::Storage(format!(
                "name contains forbidden pattern {pattern:?}: {name}"
            )));
        }
    }
    let mut components = Path::new(trimmed).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(AppError::Storage(format!("not a plain entry name: {name}"))),
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_text_file(file: &FileRef) -> bool {
    if let Some(mime) = &file.mime_type {
        if mime.starts_with("text/") {
            return true;
        }
    }
    file.extension()
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

async fn blocking<T, F>(task: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Storage(format!("storage task failed: {e}")))?
}

/// Filesystem backend: loose files and folders are the direct children of `root`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(AppError::Storage(format!(
                "storage root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn children(root: &Path, want_dirs: bool) -> Result<Vec<walkdir::DirEntry>, AppError> {
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| AppError::Storage(format!("scan failed: {e}")))?;
            let name = entry.file_name().to_string_lossy();
            if is_hidden(&name) {
                continue;
            }
            let file_type = entry.file_type();
            if (want_dirs && file_type.is_dir()) || (!want_dirs && file_type.is_file()) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_loose_files(&self) -> Result<Vec<FileRef>, AppError> {
        let root = self.root.clone();
        blocking(move || {
            let files = Self::children(&root, false)?
                .into_iter()
                .map(|entry| {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let metadata = entry.metadata().ok();
                    let mut file = FileRef::new(name.clone(), name);
                    file.size_bytes = metadata.as_ref().map(|m| m.len());
                    file.modified_at = metadata
                        .and_then(|m| m.modified().ok())
                        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());
                    file
                })
                .collect();
            Ok(files)
        })
        .await
    }

    async fn list_folders(&self) -> Result<Vec<FolderRef>, AppError> {
        let root = self.root.clone();
        blocking(move || {
            Ok(Self::children(&root, true)?
                .into_iter()
                .map(|entry| {
                    let name = entry.file_name().to_string_lossy().to_string();
                    FolderRef::new(name.clone(), name)
                })
                .collect())
        })
        .await
    }

    async fn create_folder(&self, name: &str) -> Result<String, AppError> {
        validate_entry_name(name)?;
        let name = name.trim().to_string();
        let path = self.root.join(&name);
        blocking(move || {
            if path.is_dir() {
                tracing::debug!(folder = %name, "folder already exists; reusing");
                return Ok(name);
            }
            if path.exists() {
                return Err(AppError::Storage(format!(
                    "a file named '{name}' already exists"
                )));
            }
            fs::create_dir(&path)?;
            Ok(name)
        })
        .await
    }

    async fn move_file(&self, file_id: &str, folder_id: &str) -> Result<(), AppError> {
        validate_entry_name(file_id)?;
        validate_entry_name(folder_id)?;
        let source = self.root.join(file_id);
        let dest_dir = self.root.join(folder_id);
        let dest = dest_dir.join(file_id);
        blocking(move || {
            if !source.exists() && dest.is_file() {
                tracing::debug!(file = %dest.display(), "file already in place");
                return Ok(());
            }
            if !source.is_file() {
                return Err(AppError::Storage(format!(
                    "source does not exist: {}",
                    source.display()
                )));
            }
            if !dest_dir.is_dir() {
                return Err(AppError::Storage(format!(
                    "destination is not a directory: {}",
                    dest_dir.display()
                )));
            }
            if dest.exists() {
                return Err(AppError::Storage(format!(
                    "destination already exists: {}",
                    dest.display()
                )));
            }
            fs::rename(&source, &dest)?;
            Ok(())
        })
        .await
    }

    async fn read_snippet(
        &self,
        file: &FileRef,
        max_chars: usize,
    ) -> Result<Option<String>, AppError> {
        if !is_text_file(file) {
            return Ok(None);
        }
        validate_entry_name(&file.id)?;
        let path = self.root.join(&file.id);
        blocking(move || {
            let mut buf = Vec::new();
            fs::File::open(&path)?
                .take((max_chars as u64).saturating_mul(4))
                .read_to_end(&mut buf)?;
            Ok(compact_snippet(&String::from_utf8_lossy(&buf), max_chars))
        })
        .await
    }
}
