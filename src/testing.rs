//! In-memory fakes for the storage backend and the classification oracle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::file_ref::{FileRef, FolderRef};
use crate::services::classifier_service::{Classification, ClassifyRequest, Classifier};
use crate::services::storage_service::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    CreateFolder(String),
    MoveFile { file_id: String, folder_id: String },
    ReadSnippet(String),
}

#[derive(Default)]
pub struct MemoryStorage {
    files: Vec<FileRef>,
    folders: Vec<FolderRef>,
    snippets: HashMap<String, String>,
    fail_listing: bool,
    fail_create: Mutex<HashMap<String, usize>>,
    fail_move: HashSet<String>,
    create_delay: Option<Duration>,
    move_delay: Option<Duration>,
    next_id: AtomicUsize,
    calls: Mutex<Vec<StorageCall>>,
}

impl MemoryStorage {
    pub fn with_files(names: &[&str]) -> Self {
        Self {
            files: names.iter().map(|n| FileRef::new(*n, *n)).collect(),
            ..Default::default()
        }
    }

    pub fn folder(mut self, id: &str, name: &str) -> Self {
        self.folders.push(FolderRef::new(id, name));
        self
    }

    pub fn snippet(mut self, file_id: &str, text: &str) -> Self {
        self.snippets.insert(file_id.to_string(), text.to_string());
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_create(self, name: &str) -> Self {
        self.failing_create_times(name, usize::MAX)
    }

    /// Fails the first `times` creations of `name`, then succeeds.
    pub fn failing_create_times(self, name: &str, times: usize) -> Self {
        self.fail_create
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), times);
        self
    }

    pub fn failing_move(mut self, file_id: &str) -> Self {
        self.fail_move.insert(file_id.to_string());
        self
    }

    pub fn create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn move_delay(mut self, delay: Duration) -> Self {
        self.move_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StorageCall::CreateFolder(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn move_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StorageCall::MoveFile { file_id, folder_id } => Some((file_id, folder_id)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StorageCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_loose_files(&self) -> Result<Vec<FileRef>, AppError> {
        if self.fail_listing {
            return Err(AppError::Storage("listing unavailable".to_string()));
        }
        Ok(self.files.clone())
    }

    async fn list_folders(&self) -> Result<Vec<FolderRef>, AppError> {
        if self.fail_listing {
            return Err(AppError::Storage("listing unavailable".to_string()));
        }
        Ok(self.folders.clone())
    }

    async fn create_folder(&self, name: &str) -> Result<String, AppError> {
        self.record(StorageCall::CreateFolder(name.to_string()));
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let should_fail = {
            let mut failures = self.fail_create.lock().unwrap();
            match failures.get_mut(&name.to_lowercase()) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(AppError::Storage(format!("quota exceeded creating {name}")));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("folder-{n}"))
    }

    async fn move_file(&self, file_id: &str, folder_id: &str) -> Result<(), AppError> {
        self.record(StorageCall::MoveFile {
            file_id: file_id.to_string(),
            folder_id: folder_id.to_string(),
        });
        if let Some(delay) = self.move_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_move.contains(file_id) {
            return Err(AppError::Storage(format!("permission denied for {file_id}")));
        }
        Ok(())
    }

    async fn read_snippet(
        &self,
        file: &FileRef,
        _max_chars: usize,
    ) -> Result<Option<String>, AppError> {
        self.record(StorageCall::ReadSnippet(file.id.clone()));
        Ok(self.snippets.get(&file.id).cloned())
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Label(String),
    Fail,
    Stall(Duration, String),
}

#[derive(Default)]
pub struct ScriptedClassifier {
    answers: HashMap<String, Scripted>,
    requests: Mutex<Vec<ClassifyRequest>>,
}

impl ScriptedClassifier {
    pub fn new(answers: &[(&str, &str)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(name, label)| (name.to_string(), Scripted::Label(label.to_string())))
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answer(mut self, name: &str, answer: Scripted) -> Self {
        self.answers.insert(name.to_string(), answer);
        self
    }

    pub fn requests(&self) -> Vec<ClassifyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.answers.get(&request.name).cloned() {
            Some(Scripted::Label(label)) => Ok(Classification::label(label)),
            Some(Scripted::Fail) => Err(AppError::Classification("oracle error".to_string())),
            Some(Scripted::Stall(delay, label)) => {
                tokio::time::sleep(delay).await;
                Ok(Classification::label(label))
            }
            None => Ok(Classification::label("To Sort")),
        }
    }
}
