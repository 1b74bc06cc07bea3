pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use cli::Cli;
use commands::organize_pipeline::{
    run_plan_pipeline, run_reclassify_pipeline, ExecutionScope, PipelineCtx, PlanExecutor,
};
use commands::review_commands::{display_plan, display_report, review_loop, Prompter, ReviewDecision};
use config::{ClassifierBackend, OrganizerConfig};
use error::AppError;
use services::classifier_service::{Classifier, GeminiClassifier, KeywordClassifier};
use services::storage_service::{LocalStorage, Storage};
use state::SessionState;

fn keyword_classifier(config: &OrganizerConfig) -> Result<KeywordClassifier, AppError> {
    let mut classifier = KeywordClassifier::new()?;
    for rule in &config.classifier.rules {
        classifier.add_rule(&rule.pattern, &rule.folder, rule.priority)?;
        tracing::debug!(
            folder = %rule.folder,
            patterns = ?classifier.rules_for_folder(&rule.folder),
            "added keyword rule"
        );
    }
    Ok(classifier)
}

/// Classifier for the configured backend, or `None` when the mode needs none.
pub fn build_classifier(config: &OrganizerConfig) -> Result<Option<Arc<dyn Classifier>>, AppError> {
    if !config.mode.uses_classifier() {
        return Ok(None);
    }
    let classifier: Arc<dyn Classifier> = match config.classifier.backend {
        ClassifierBackend::Keyword => Arc::new(keyword_classifier(config)?),
        ClassifierBackend::Gemini => {
            let api_key = config.api_key().ok_or_else(|| {
                AppError::Config(format!(
                    "set {} to use the gemini classifier",
                    config.classifier.api_key_env
                ))
            })?;
            Arc::new(GeminiClassifier::new(
                api_key,
                config.classifier.model.clone(),
                config.classifier.endpoint.clone(),
                config.limits().classify_timeout,
            )?)
        }
    };
    Ok(Some(classifier))
}

fn spawn_interrupt_handler(runtime: &tokio::runtime::Runtime, session: SessionState) {
    runtime.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if session.is_cancelled() {
                std::process::exit(130);
            }
            session.mark_cancelled();
            eprintln!("\nCancelling; in-flight operations will finish. Press Ctrl-C again to quit.");
        }
    });
}

fn offer_retry<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    failed: usize,
) -> std::io::Result<bool> {
    prompter.confirm(&format!("Retry {failed} failed file(s)?"))
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let mut config =
        OrganizerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_to(&mut config);
    config.validate()?;

    let root = match &config.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(&root).with_context(|| format!("cannot organize {}", root.display()))?,
    );
    let classifier = build_classifier(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let session = SessionState::new();
    spawn_interrupt_handler(&runtime, session.clone());
    tracing::info!(session = %session.session_id, root = %root.display(), mode = %config.mode, "starting session");

    let ctx = PipelineCtx {
        session: session.clone(),
        storage: storage.clone(),
        classifier,
        mode: config.mode,
        fallback_label: config.fallback_label.clone(),
        limits: config.limits(),
    };

    println!("Scanning {} ...", display_root(&root));
    let mut plan = match runtime.block_on(run_plan_pipeline(&ctx)) {
        Ok(plan) => plan,
        Err(AppError::Cancelled) => {
            println!("Cancelled. No changes were made.");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to build organization plan"),
    };
    if plan.is_empty() {
        println!("No loose files to organize.");
        return Ok(());
    }

    let executor = PlanExecutor::new(storage, session.clone(), config.limits());
    let stdin = std::io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), std::io::stdout());

    if cli.dry_run {
        display_plan(&plan, prompter.output())?;
        let report = runtime.block_on(executor.preview(&plan, &ExecutionScope::All));
        display_report(&report, prompter.output())?;
        return Ok(());
    }

    if cli.auto_approve {
        display_plan(&plan, prompter.output())?;
    } else {
        let allow_reclassify = ctx.classifier.is_some();
        loop {
            match review_loop(&mut plan, &mut prompter, allow_reclassify)? {
                ReviewDecision::Approved if !session.is_cancelled() => break,
                ReviewDecision::Reclassify => {
                    match runtime.block_on(run_reclassify_pipeline(&ctx, &mut plan)) {
                        Ok(updated) => println!("Reclassified {updated} file(s)."),
                        Err(AppError::Cancelled) => {
                            session.reset_cancel_flag();
                            println!("Reclassification cancelled; plan kept as it was.");
                        }
                        Err(e) => println!("Reclassification failed: {e}"),
                    }
                }
                _ => {
                    println!("Cancelled. No changes were made.");
                    return Ok(());
                }
            }
        }
    }

    let mut report = runtime.block_on(executor.execute(&plan, &ExecutionScope::All));
    display_report(&report, prompter.output())?;

    while report.failed_count() > 0 && !cli.auto_approve {
        if !offer_retry(&mut prompter, report.failed_count())? {
            break;
        }
        session.reset_cancel_flag();
        let scope = ExecutionScope::Only(report.failed_file_ids());
        report = runtime.block_on(executor.execute(&plan, &scope));
        display_report(&report, prompter.output())?;
    }

    if report.failed_count() > 0 {
        anyhow::bail!("{} file(s) could not be moved", report.failed_count());
    }
    Ok(())
}

fn display_root(root: &std::path::Path) -> String {
    std::fs::canonicalize(root)
        .unwrap_or_else(|_| PathBuf::from(root))
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::operation::ClassificationMode;
    use crate::services::classifier_service::ClassifyRequest;
    use std::io::Cursor;

    #[test]
    fn no_classifier_for_none_mode() {
        let config = OrganizerConfig {
            mode: ClassificationMode::None,
            ..OrganizerConfig::default()
        };
        assert!(build_classifier(&config).unwrap().is_none());
    }

    #[test]
    fn keyword_backend_is_the_default() {
        let config = OrganizerConfig::default();
        assert!(build_classifier(&config).unwrap().is_some());
    }

    #[test]
    fn configured_keyword_rules_take_priority() {
        let config = OrganizerConfig::from_toml_str(
            r#"
            [[classifier.rules]]
            pattern = "invoice"
            folder = "Bills"
            priority = 0
            "#,
        )
        .unwrap();
        let classifier = keyword_classifier(&config).unwrap();
        let request = ClassifyRequest {
            name: "invoice_march.pdf".to_string(),
            ..ClassifyRequest::default()
        };
        assert_eq!(classifier.classify_sync(&request).label, "Bills");
        assert_eq!(classifier.rules_for_folder("bills"), vec!["invoice".to_string()]);
    }

    #[test]
    fn bad_keyword_rule_is_a_config_error() {
        let mut config = OrganizerConfig::default();
        config.classifier.rules.push(config::KeywordRuleConfig {
            pattern: "(".to_string(),
            folder: "Broken".to_string(),
            priority: None,
        });
        assert!(matches!(build_classifier(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn gemini_without_key_is_a_config_error() {
        let mut config = OrganizerConfig::default();
        config.classifier.backend = ClassifierBackend::Gemini;
        config.classifier.api_key_env = "DRIVE_ORGANIZER_TEST_UNSET_KEY".to_string();
        assert!(matches!(build_classifier(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn retry_prompt_accepts_yes() {
        let mut prompter = Prompter::new(Cursor::new("yes\n"), Vec::new());
        assert!(offer_retry(&mut prompter, 2).unwrap());
        let mut prompter = Prompter::new(Cursor::new(""), Vec::new());
        assert!(!offer_retry(&mut prompter, 2).unwrap());
    }
}
