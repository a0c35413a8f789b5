//! Verge Kubernetes Operator binary.
//!
//! Watches Bundle custom resources and keeps their derived children
//! converged through the multi-phase reconciliation engine.

use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use std::sync::Arc;
use std::time::Duration;

use verge_core::error::Error;
use verge_core::object::ObjectKey;
use verge_core::reconciler::multiphase::MultiPhaseReconciler;
use verge_core::reconciler::{EngineContext, ReconcileAction};
use verge_core::store::{KubeChildStore, KubeStore};
use verge_operator::steps::{ConfigStep, ServiceStep};
use verge_operator::Bundle;

const FINALIZER: &str = "verge.dev/bundle-finalizer";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("verge_operator=info".parse()?)
                .add_directive("verge_core=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    tracing::info!("Starting Verge Kubernetes Operator");

    // Check for CRD generation mode
    if std::env::args().any(|arg| arg == "--generate-crds") {
        generate_crds()?;
        return Ok(());
    }

    // Connect to Kubernetes
    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    run_bundle_controller(client).await
}

/// Run the Bundle controller.
async fn run_bundle_controller(client: Client) -> anyhow::Result<()> {
    tracing::info!("Starting Bundle controller");

    let bundles: Api<Bundle> = Api::all(client.clone());
    let store = Arc::new(KubeStore::<Bundle>::new(client.clone()));
    let ctx = EngineContext::new(Arc::new(KubeChildStore::new(client)));
    let reconciler = Arc::new(
        MultiPhaseReconciler::new(store, ctx, FINALIZER)
            .with_step(Box::new(ConfigStep))
            .with_step(Box::new(ServiceStep)),
    );

    Controller::new(bundles, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            move |bundle, _ctx| {
                let reconciler = reconciler.clone();
                async move {
                    let key = ObjectKey::new(
                        bundle.namespace().unwrap_or_default(),
                        bundle.name_any(),
                    );
                    match reconciler.reconcile(&key).await {
                        Ok(ReconcileAction::Requeue(duration)) => Ok(Action::requeue(duration)),
                        Ok(ReconcileAction::Done) => Ok(Action::await_change()),
                        Err(e) => {
                            tracing::error!(bundle = %key, error = %e, "Bundle reconciliation error");
                            Ok(Action::requeue(Duration::from_secs(30)))
                        }
                    }
                }
            },
            |_bundle, error: &Error, _ctx| {
                tracing::error!(error = %error, "Bundle controller error");
                Action::requeue(Duration::from_secs(60))
            },
            Arc::new(()),
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(bundle = %obj.name, ?action, "Reconciled bundle");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Bundle controller stream error");
                }
            }
        })
        .await;

    Ok(())
}

/// Generate CRD YAML files.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&Bundle::crd())?);
    Ok(())
}
