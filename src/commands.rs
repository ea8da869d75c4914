//! Command execution.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use potato_core::{Application, ControllerConfig, NamespacedName};
use potato_manifest::DynamicObject;
use potato_reconciler::{
    AdapterRegistry, ApplicationReconciler, Controller, ErrorClass, InMemoryCluster, LoopConfig,
    ManifestReport, NextAction, PassStatus, ReconcileOutcome,
};
use potato_source::GitSourceSync;
use serde::Serialize;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::{Commands, GlobalArgs};

/// Execute a CLI command.
pub async fn execute_command(global: GlobalArgs, command: Commands) -> Result<()> {
    let config = load_config(&global)?;

    match command {
        Commands::Reconcile {
            name,
            namespace,
            repository,
            reference,
        } => {
            let key = NamespacedName::new(namespace, name);
            cmd_reconcile(&config, &key, repository, reference).await
        }
        Commands::Run { apps } => cmd_run(&config, &apps).await,
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(global: &GlobalArgs) -> Result<ControllerConfig> {
    let mut config = match &global.config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    if let Some(namespace) = &global.target_namespace {
        config.target_namespace.clone_from(namespace);
    }
    if let Some(root) = &global.mirror_root {
        config.mirror_root.clone_from(root);
    }
    if let Some(secs) = global.requeue_secs {
        config.requeue_interval_secs = secs;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Reconciler wired to an in-memory cluster and git mirrors.
fn build_reconciler(
    config: &ControllerConfig,
    cluster: &Arc<InMemoryCluster>,
) -> Result<ApplicationReconciler> {
    ApplicationReconciler::builder()
        .with_applications(cluster.clone())
        .with_source(Arc::new(GitSourceSync::new(config)))
        .with_adapters(AdapterRegistry::with_default_kinds(
            cluster.clone(),
            config.target_namespace.clone(),
        ))
        .with_config(config)
        .build()
        .ok_or_else(|| anyhow!("reconciler is missing a dependency"))
}

/// Run one pass and print what it did.
async fn cmd_reconcile(
    config: &ControllerConfig,
    key: &NamespacedName,
    repository: String,
    reference: String,
) -> Result<()> {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster
        .put_application(Application::new(key, repository, reference))
        .await;

    let reconciler = build_reconciler(config, &cluster)?;
    let outcome = reconciler.reconcile(key).await;
    let objects = cluster.objects().await;

    let report = PassReport {
        outcome: OutcomeView::from(&outcome),
        objects,
    };
    let yaml = serde_yaml::to_string(&report).context("Failed to render pass report")?;
    print!("{yaml}");

    match outcome.error() {
        Some(e) => Err(anyhow!("reconciliation of {key} failed: {e}")),
        None => Ok(()),
    }
}

/// Load Applications and run the controller until Ctrl-C.
async fn cmd_run(config: &ControllerConfig, apps: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(apps)
        .await
        .with_context(|| format!("Failed to read {}", apps.display()))?;
    let applications: Vec<Application> = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse Applications from {}", apps.display()))?;

    let cluster = Arc::new(InMemoryCluster::new());
    for application in applications {
        let application = cluster.put_application(application).await;
        info!(application = %application.key(), repository = %application.spec.repository, "Loaded application");
    }

    let reconciler = Arc::new(build_reconciler(config, &cluster)?);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut controller =
        Controller::new(reconciler, cluster.clone(), LoopConfig::from(config)).with_outcomes(tx);
    let stopper = controller.stopper();

    let printer = tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            log_outcome(&outcome);
        }
    });

    let shutdown = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, stopping controller"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, stopping controller"),
        }
        stopper.stop();
    });

    controller.run().await;
    shutdown.abort();
    drop(controller);
    printer.await.context("Outcome printer panicked")?;

    let objects = cluster.objects().await;
    info!(objects = objects.len(), "Controller stopped");
    Ok(())
}

fn log_outcome(outcome: &ReconcileOutcome) {
    match outcome.error() {
        Some(e) => warn!(
            application = %outcome.application,
            error = %e,
            class = ?e.class(),
            next = ?outcome.next_action,
            "Pass failed"
        ),
        None => info!(
            application = %outcome.application,
            revision = outcome.revision.as_deref().unwrap_or("none"),
            manifests = outcome.manifests.len(),
            wrote = outcome.wrote_anything(),
            next = ?outcome.next_action,
            "Pass finished"
        ),
    }
}

#[derive(Debug, Serialize)]
struct PassReport<'a> {
    outcome: OutcomeView<'a>,
    objects: Vec<DynamicObject>,
}

/// Printable view of a [`ReconcileOutcome`].
#[derive(Debug, Serialize)]
struct OutcomeView<'a> {
    application: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    revision: Option<&'a str>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<ErrorClass>,
    next: String,
    manifests: &'a [ManifestReport],
    duration_ms: i64,
}

impl<'a> From<&'a ReconcileOutcome> for OutcomeView<'a> {
    fn from(outcome: &'a ReconcileOutcome) -> Self {
        let status = match outcome.status {
            PassStatus::Converged => "converged",
            PassStatus::Deleted => "deleted",
            PassStatus::Aborted { .. } => "aborted",
        };
        let next = match outcome.next_action {
            NextAction::Done => "done".to_string(),
            NextAction::RequeueAfter(delay) => format!("requeue after {}s", delay.as_secs()),
            NextAction::Backoff => "backoff".to_string(),
        };

        Self {
            application: outcome.application.to_string(),
            revision: outcome.revision.as_deref(),
            status,
            error: outcome.error().map(ToString::to_string),
            class: outcome.error_class(),
            next,
            manifests: &outcome.manifests,
            duration_ms: outcome
                .finished_at
                .signed_duration_since(outcome.started_at)
                .num_milliseconds(),
        }
    }
}
