use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::AppError;
use crate::models::file_ref::{FileRef, FolderRef};
use crate::models::operation::{
    ClassificationMode, CreatedFolder, ExecutionOutcome, ExecutionReport, ExecutionResult,
    FailureKind,
};
use crate::models::plan::{normalize_label, Assignment, AssignmentOrigin, FolderTarget, Plan};
use crate::services::classifier_service::{Classification, ClassifyRequest, Classifier};
use crate::services::organize_service;
use crate::services::storage_service::{Storage, DEFAULT_SNIPPET_CHARS};
use crate::state::SessionState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(15);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(75);
const PREVIEW_FOLDER_PREFIX: &str = "preview:";

// ---------------------------------------------------------------------------
// Pipeline context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineLimits {
    pub concurrency: usize,
    pub classify_timeout: Duration,
    pub storage_timeout: Duration,
    pub snippet_chars: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }
}

pub struct PipelineCtx {
    pub session: SessionState,
    pub storage: Arc<dyn Storage>,
    pub classifier: Option<Arc<dyn Classifier>>,
    pub mode: ClassificationMode,
    pub fallback_label: String,
    pub limits: PipelineLimits,
}

pub struct StageScanResult {
    pub files: Vec<FileRef>,
    pub folders: Vec<FolderRef>,
}

// ---------------------------------------------------------------------------
// Call helpers
// ---------------------------------------------------------------------------

pub fn is_organize_cancelled(cancel_flag: &AtomicBool) -> bool {
    cancel_flag.load(Ordering::Relaxed)
}

/// Awaits `fut` until it finishes, `limit` elapses, or the optional cancel flag
/// is raised. Only the caller's item fails on timeout.
async fn with_deadline<T, F>(
    what: &str,
    limit: Duration,
    cancel_flag: Option<&AtomicBool>,
    fut: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    let started = tokio::time::Instant::now();
    tokio::pin!(fut);
    loop {
        let remaining = limit.saturating_sub(started.elapsed());
        tokio::select! {
            result = &mut fut => return result,
            _ = tokio::time::sleep(remaining.min(CANCEL_POLL_INTERVAL)) => {
                if cancel_flag.is_some_and(is_organize_cancelled) {
                    return Err(AppError::Cancelled);
                }
                if started.elapsed() >= limit {
                    return Err(AppError::Timeout(what.to_string(), limit));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Plan building
// ---------------------------------------------------------------------------

pub async fn stage_scan(ctx: &PipelineCtx) -> Result<StageScanResult, AppError> {
    let timeout = ctx.limits.storage_timeout;
    let folders = with_deadline("list folders", timeout, None, ctx.storage.list_folders()).await?;
    let files =
        with_deadline("list loose files", timeout, None, ctx.storage.list_loose_files()).await?;
    tracing::info!(
        files = files.len(),
        folders = folders.len(),
        "scanned storage"
    );
    Ok(StageScanResult { files, folders })
}

async fn load_snippet(
    storage: &dyn Storage,
    file: &FileRef,
    limits: &PipelineLimits,
) -> Option<String> {
    if file.snippet.is_some() {
        return file.snippet.clone();
    }
    let what = format!("read content of '{}'", file.name);
    match with_deadline(
        &what,
        limits.storage_timeout,
        None,
        storage.read_snippet(file, limits.snippet_chars),
    )
    .await
    {
        Ok(snippet) => snippet,
        Err(e) => {
            tracing::debug!(file = %file.name, error = %e, "content unavailable; classifying by name");
            None
        }
    }
}

/// Classifies `files` concurrently and returns one outcome per file, in input
/// order. Per-file failures are outcomes; only cancellation fails the stage.
pub async fn stage_classify(
    ctx: &PipelineCtx,
    classifier: Arc<dyn Classifier>,
    files: &[FileRef],
    known_folders: &[FolderRef],
) -> Result<Vec<Result<Classification, AppError>>, AppError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let total = files.len();
    let cancel_flag = ctx.session.cancel_flag();
    let parallelism = ctx.limits.concurrency.max(1).min(total);
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let known: Arc<Vec<String>> = Arc::new(known_folders.iter().map(|f| f.name.clone()).collect());
    let mut join_set: JoinSet<(usize, Result<Classification, AppError>)> = JoinSet::new();

    for (idx, file) in files.iter().cloned().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Classification("classification worker pool closed".to_string()))?;
        if is_organize_cancelled(&cancel_flag) {
            join_set.abort_all();
            return Err(AppError::Cancelled);
        }
        let classifier = classifier.clone();
        let storage = ctx.storage.clone();
        let cancel_flag = cancel_flag.clone();
        let known = known.clone();
        let limits = ctx.limits.clone();
        let reads_content = ctx.mode.reads_content();

        join_set.spawn(async move {
            let _permit = permit;
            let content = if reads_content {
                load_snippet(storage.as_ref(), &file, &limits).await
            } else {
                None
            };
            let request = ClassifyRequest {
                name: file.name.clone(),
                content,
                known_folders: known.as_ref().clone(),
            };
            let what = format!("classify '{}'", file.name);
            let outcome = with_deadline(
                &what,
                limits.classify_timeout,
                Some(&*cancel_flag),
                classifier.classify(&request),
            )
            .await;
            (idx, outcome)
        });
    }

    let mut completed = 0usize;
    let mut ordered: Vec<Option<Result<Classification, AppError>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        if is_organize_cancelled(&cancel_flag) {
            join_set.abort_all();
            return Err(AppError::Cancelled);
        }
        let (idx, outcome) = match joined {
            Ok(pair) => pair,
            Err(join_err) if join_err.is_cancelled() => {
                join_set.abort_all();
                return Err(AppError::Cancelled);
            }
            Err(join_err) => {
                tracing::warn!(error = %join_err, "classification task failed");
                continue;
            }
        };
        if outcome.as_ref().is_err_and(AppError::is_cancelled) {
            join_set.abort_all();
            return Err(AppError::Cancelled);
        }
        completed += 1;
        tracing::debug!(completed, total, "classified file");
        ordered[idx] = Some(outcome);
    }

    Ok(ordered
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(AppError::Classification(
                    "classification task did not finish".to_string(),
                ))
            })
        })
        .collect())
}

fn require_classifier(ctx: &PipelineCtx) -> Result<Arc<dyn Classifier>, AppError> {
    ctx.classifier.clone().ok_or_else(|| {
        AppError::Config(format!("mode '{}' needs a classifier", ctx.mode))
    })
}

/// Scans storage and builds the initial plan. Fails only if the scan fails or
/// the session is cancelled.
pub async fn run_plan_pipeline(ctx: &PipelineCtx) -> Result<Plan, AppError> {
    let scan = stage_scan(ctx).await?;
    if is_organize_cancelled(&ctx.session.cancel_flag()) {
        return Err(AppError::Cancelled);
    }

    if !ctx.mode.uses_classifier() || scan.files.is_empty() {
        return Ok(organize_service::build_unclassified_plan(
            scan.files,
            scan.folders,
            &ctx.fallback_label,
        ));
    }

    let classifier = require_classifier(ctx)?;
    tracing::info!(mode = %ctx.mode, files = scan.files.len(), "classifying files");
    let outcomes = stage_classify(ctx, classifier, &scan.files, &scan.folders).await?;
    let plan = organize_service::build_classified_plan(
        scan.files,
        scan.folders,
        &ctx.fallback_label,
        outcomes,
    );
    let summary = plan.summary();
    tracing::info!(
        files = summary.total_files,
        new_folders = summary.new_folders,
        existing_folders = summary.existing_folders,
        flagged = summary.flagged_files,
        "built organization plan"
    );
    Ok(plan)
}

/// Reruns classification for every non-manual assignment of `plan`.
pub async fn run_reclassify_pipeline(ctx: &PipelineCtx, plan: &mut Plan) -> Result<usize, AppError> {
    if !ctx.mode.uses_classifier() {
        return Ok(0);
    }
    let classifier = require_classifier(ctx)?;
    let files: Vec<FileRef> = plan
        .assignments()
        .iter()
        .filter(|a| a.origin != AssignmentOrigin::Manual)
        .map(|a| a.file.clone())
        .collect();
    let folders = plan.folders().to_vec();
    let outcomes = stage_classify(ctx, classifier, &files, &folders).await?;
    let by_id: HashMap<String, Result<Classification, AppError>> = files
        .into_iter()
        .map(|f| f.id)
        .zip(outcomes)
        .collect();
    Ok(organize_service::apply_reclassification(plan, by_id))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub enum ExecutionScope {
    #[default]
    All,
    Only(HashSet<String>),
}

impl ExecutionScope {
    fn includes(&self, file_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(file_id),
        }
    }
}

type FolderSlot = Arc<tokio::sync::Mutex<Option<Result<String, String>>>>;

/// Backend folder ids by normalized proposed label. Each label has its own
/// async lock, so exactly one task creates a given folder per run.
#[derive(Default)]
pub struct FolderCache {
    slots: Mutex<HashMap<String, FolderSlot>>,
}

impl FolderCache {
    fn slot(&self, key: &str) -> FolderSlot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Returns the cached id for `key`, calling `create` only if the label has
    /// no recorded result yet. The flag is true when this call created it.
    pub async fn resolve<F, Fut>(&self, key: &str, create: F) -> Result<(String, bool), String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, AppError>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if let Some(recorded) = guard.as_ref() {
            return recorded.clone().map(|id| (id, false));
        }
        let outcome = create().await.map_err(|e| e.to_string());
        *guard = Some(outcome.clone());
        outcome.map(|id| (id, true))
    }

    /// Drops recorded failures so the next run asks the backend again.
    pub fn forget_failures(&self) {
        let slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for slot in slots.values() {
            if let Ok(mut guard) = slot.try_lock() {
                if matches!(guard.as_ref(), Some(Err(_))) {
                    *guard = None;
                }
            }
        }
    }

    /// Copy holding only the successfully created folders.
    pub fn snapshot(&self) -> FolderCache {
        let slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let copied = slots
            .iter()
            .filter_map(|(key, slot)| {
                let guard = slot.try_lock().ok()?;
                match guard.as_ref() {
                    Some(Ok(id)) => Some((
                        key.clone(),
                        Arc::new(tokio::sync::Mutex::new(Some(Ok(id.clone())))),
                    )),
                    _ => None,
                }
            })
            .collect();
        FolderCache {
            slots: Mutex::new(copied),
        }
    }
}

/// Storage stand-in for dry runs: accepts everything and touches nothing.
struct PreviewStorage;

#[async_trait]
impl Storage for PreviewStorage {
    async fn list_loose_files(&self) -> Result<Vec<FileRef>, AppError> {
        Ok(Vec::new())
    }

    async fn list_folders(&self) -> Result<Vec<FolderRef>, AppError> {
        Ok(Vec::new())
    }

    async fn create_folder(&self, name: &str) -> Result<String, AppError> {
        Ok(format!("{PREVIEW_FOLDER_PREFIX}{name}"))
    }

    async fn move_file(&self, _file_id: &str, _folder_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

fn failed(kind: FailureKind, reason: String) -> ExecutionOutcome {
    ExecutionOutcome::Failed { kind, reason }
}

fn result_for(assignment: &Assignment, outcome: ExecutionOutcome) -> ExecutionResult {
    ExecutionResult {
        file_id: assignment.file.id.clone(),
        file_name: assignment.file.name.clone(),
        target_label: assignment.target.label().to_string(),
        outcome,
    }
}

struct TaskOutput {
    idx: usize,
    result: ExecutionResult,
    created: Option<CreatedFolder>,
}

async fn execute_assignment(
    idx: usize,
    assignment: Assignment,
    storage: Arc<dyn Storage>,
    cache: Arc<FolderCache>,
    cancel_flag: Arc<AtomicBool>,
    timeout: Duration,
) -> TaskOutput {
    let finish = |outcome, created| TaskOutput {
        idx,
        result: result_for(&assignment, outcome),
        created,
    };

    if is_organize_cancelled(&cancel_flag) {
        return finish(
            failed(FailureKind::Cancelled, "cancelled before move".to_string()),
            None,
        );
    }

    let mut created = None;
    let folder_id = match &assignment.target {
        FolderTarget::Existing { folder_id, .. } => folder_id.clone(),
        FolderTarget::Proposed { label } => {
            let key = normalize_label(label);
            let resolved = cache
                .resolve(&key, || async {
                    if is_organize_cancelled(&cancel_flag) {
                        return Err(AppError::Cancelled);
                    }
                    let what = format!("create folder '{label}'");
                    with_deadline(&what, timeout, None, storage.create_folder(label)).await
                })
                .await;
            match resolved {
                Ok((id, was_created)) => {
                    if was_created {
                        created = Some(CreatedFolder {
                            label: label.clone(),
                            folder_id: id.clone(),
                        });
                    }
                    id
                }
                Err(reason) => {
                    tracing::warn!(folder = %label, file = %assignment.file.name, %reason, "folder unavailable");
                    let reason = AppError::FolderCreation {
                        label: label.clone(),
                        reason,
                    }
                    .to_string();
                    return finish(failed(FailureKind::FolderCreation, reason), None);
                }
            }
        }
    };

    if is_organize_cancelled(&cancel_flag) {
        return finish(
            failed(FailureKind::Cancelled, "cancelled before move".to_string()),
            created,
        );
    }

    let what = format!("move '{}'", assignment.file.name);
    let moved = with_deadline(
        &what,
        timeout,
        None,
        storage.move_file(&assignment.file.id, &folder_id),
    )
    .await;
    match moved {
        Ok(()) => finish(ExecutionOutcome::Moved { folder_id }, created),
        Err(e) => {
            tracing::warn!(file = %assignment.file.name, error = %e, "move failed");
            let reason = AppError::Move {
                file_id: assignment.file.id.clone(),
                reason: e.to_string(),
            }
            .to_string();
            finish(failed(FailureKind::Move, reason), created)
        }
    }
}

/// Applies approved plans. Keeps its folder cache between runs so a retry of
/// the failed subset reuses folders created earlier in the session.
pub struct PlanExecutor {
    storage: Arc<dyn Storage>,
    cache: Arc<FolderCache>,
    session: SessionState,
    limits: PipelineLimits,
}

impl PlanExecutor {
    pub fn new(storage: Arc<dyn Storage>, session: SessionState, limits: PipelineLimits) -> Self {
        Self {
            storage,
            cache: Arc::new(FolderCache::default()),
            session,
            limits,
        }
    }

    pub async fn execute(&self, plan: &Plan, scope: &ExecutionScope) -> ExecutionReport {
        self.cache.forget_failures();
        self.run(plan, scope, self.storage.clone(), self.cache.clone(), false)
            .await
    }

    /// Dry run: same walk and result shape, zero calls to the real storage.
    pub async fn preview(&self, plan: &Plan, scope: &ExecutionScope) -> ExecutionReport {
        let cache = Arc::new(self.cache.snapshot());
        self.run(plan, scope, Arc::new(PreviewStorage), cache, true)
            .await
    }

    async fn run(
        &self,
        plan: &Plan,
        scope: &ExecutionScope,
        storage: Arc<dyn Storage>,
        cache: Arc<FolderCache>,
        dry_run: bool,
    ) -> ExecutionReport {
        let started_at = chrono::Utc::now().to_rfc3339();
        let cancel_flag = self.session.cancel_flag();
        let in_scope: Vec<&Assignment> = plan
            .assignments()
            .iter()
            .filter(|a| scope.includes(&a.file.id))
            .collect();
        let total = in_scope.len();
        let mut ordered: Vec<Option<ExecutionResult>> = (0..total).map(|_| None).collect();
        let mut folders_created = Vec::new();

        let semaphore = Arc::new(Semaphore::new(self.limits.concurrency.max(1)));
        let mut join_set: JoinSet<TaskOutput> = JoinSet::new();

        for (idx, assignment) in in_scope.iter().enumerate() {
            if assignment.is_skipped() {
                ordered[idx] = Some(result_for(assignment, ExecutionOutcome::Skipped));
                continue;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    ordered[idx] = Some(result_for(
                        assignment,
                        failed(FailureKind::Move, "execution worker pool closed".to_string()),
                    ));
                    continue;
                }
            };
            let assignment = (*assignment).clone();
            let storage = storage.clone();
            let cache = cache.clone();
            let cancel_flag = cancel_flag.clone();
            let timeout = self.limits.storage_timeout;
            join_set.spawn(async move {
                let _permit = permit;
                execute_assignment(idx, assignment, storage, cache, cancel_flag, timeout).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(output) => {
                    if let Some(created) = output.created {
                        folders_created.push(created);
                    }
                    ordered[output.idx] = Some(output.result);
                }
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "execution task failed");
                }
            }
        }

        let results: Vec<ExecutionResult> = ordered
            .into_iter()
            .zip(in_scope)
            .map(|(slot, assignment)| {
                slot.unwrap_or_else(|| {
                    result_for(
                        assignment,
                        failed(FailureKind::Move, "execution task did not finish".to_string()),
                    )
                })
            })
            .collect();

        let report = ExecutionReport {
            session_id: self.session.session_id.clone(),
            dry_run,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            folders_created,
            results,
        };
        tracing::info!(
            dry_run,
            moved = report.moved_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            "execution finished"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
