//! Cassandra Kubernetes Operator binary.
//!
//! Runs the DataCenter and CassandraTask controllers together with the node
//! status poller feeding them.

use cassandra_operator::config::OperatorConfig;
use cassandra_operator::controller::{
    ControllerContext, DataCenterController, ReconcileAction, TaskController,
};
use cassandra_operator::crd::{CassandraTask, DataCenter};
use cassandra_operator::names::ClusterKey;
use cassandra_operator::poller::NodeStatusPoller;
use cassandra_operator::sidecar::HttpSidecarClientFactory;
use cassandra_operator::store::KubeStore;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt, Resource};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cassandra_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    if std::env::args().any(|arg| arg == "--generate-crds") {
        generate_crds()?;
        return Ok(());
    }

    tracing::info!("Starting Cassandra Kubernetes Operator");

    let config = OperatorConfig::from_env();
    tracing::info!(
        namespace = ?config.namespace,
        poll_secs = config.node_status_poll_interval.as_secs(),
        workers = config.worker_pool_size,
        "Operator configuration loaded"
    );

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let store = Arc::new(KubeStore::new(client.clone()));
    let sidecars = Arc::new(HttpSidecarClientFactory::new(config.sidecar_timeout));
    let ctx = Arc::new(ControllerContext::new(store, sidecars, config.clone()));

    let (changes_tx, changes_rx) = futures::channel::mpsc::unbounded();
    let poller = NodeStatusPoller::new(
        ctx.cache.clone(),
        ctx.registry.clone(),
        ctx.sidecars.clone(),
        config.node_status_poll_interval,
        config.sidecar_timeout,
    )
    .with_notifications(changes_tx);

    let datacenter_controller = run_datacenter_controller(client.clone(), ctx.clone());
    let task_controller = run_task_controller(client.clone(), ctx.clone());
    let status_changes = forward_status_changes(changes_rx, ctx.clone());

    tokio::select! {
        result = datacenter_controller => {
            tracing::error!("DataCenter controller exited: {:?}", result);
            result?;
        }
        result = task_controller => {
            tracing::error!("Task controller exited: {:?}", result);
            result?;
        }
        _ = poller.run() => {
            tracing::error!("Node status poller exited");
        }
        _ = status_changes => {
            tracing::error!("Status change forwarder exited");
        }
    }

    Ok(())
}

fn api<K>(client: Client, config: &OperatorConfig) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match &config.namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

fn to_action(action: ReconcileAction) -> Action {
    match action {
        ReconcileAction::Requeue(duration) => Action::requeue(duration),
        ReconcileAction::Done => Action::await_change(),
    }
}

/// Run the DataCenter controller.
async fn run_datacenter_controller(
    client: Client,
    ctx: Arc<ControllerContext>,
) -> anyhow::Result<()> {
    tracing::info!("Starting DataCenter controller");

    let datacenters: Api<DataCenter> = api(client.clone(), &ctx.config);
    let statefulsets: Api<StatefulSet> = api(client.clone(), &ctx.config);
    let controller = DataCenterController::new(ctx.clone());

    Controller::new(datacenters, WatcherConfig::default())
        .owns(statefulsets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            move |dc, _ctx| {
                let controller = controller.clone();
                async move { controller.reconcile(dc).await.map(to_action) }
            },
            cassandra_operator::controller::datacenter_error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(datacenter = %obj.name, ?action, "Reconciled DataCenter");
                }
                Err(e) => {
                    tracing::error!(error = %e, "DataCenter controller stream error");
                }
            }
        })
        .await;

    Ok(())
}

/// Run the CassandraTask controller.
async fn run_task_controller(client: Client, ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    tracing::info!("Starting CassandraTask controller");

    let tasks: Api<CassandraTask> = api(client.clone(), &ctx.config);
    let controller = TaskController::new(ctx.clone());

    Controller::new(tasks, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            move |task, _ctx| {
                let controller = controller.clone();
                async move { controller.reconcile(task).await.map(to_action) }
            },
            cassandra_operator::controller::task_error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(task = %obj.name, ?action, "Reconciled task");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Task controller stream error");
                }
            }
        })
        .await;

    Ok(())
}

/// Reconcile a DataCenter whenever one of its members changes node status.
async fn forward_status_changes(
    mut changes: UnboundedReceiver<ClusterKey>,
    ctx: Arc<ControllerContext>,
) {
    let controller = DataCenterController::new(ctx.clone());
    while let Some(key) = changes.next().await {
        let dc = match ctx.store.get_datacenter(&key.namespace, &key.name).await {
            Ok(Some(dc)) => dc,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cannot load DataCenter after status change");
                continue;
            }
        };
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.reconcile(Arc::new(dc)).await {
                tracing::warn!(key = %key, error = %e, "Status-triggered reconciliation failed");
            }
        });
    }
}

/// Generate CRD YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&DataCenter::crd())?);
    println!("---");
    println!("{}", serde_yaml::to_string(&CassandraTask::crd())?);
    Ok(())
}
