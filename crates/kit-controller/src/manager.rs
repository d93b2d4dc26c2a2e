//! Wires store change events to per-kind work queues and workers

use crate::config::ManagerConfig;
use crate::controllers::{
    AutoScalingGroupController, BucketController, Context, ControlPlaneController,
    ElasticIpController, InstanceProfileController, InternetGatewayController,
    LaunchTemplateController, LoadBalancerController, NatGatewayController, PolicyController,
    RoleController, RouteTableController, SecurityGroupController, SubnetController,
    TargetGroupController, VpcController,
};
use crate::error::{ReconcileError, Result};
use crate::queue::WorkQueue;
use crate::ratelimit::{default_rate_limiter, RateLimiter};
use crate::reconciler::{Action, Reconcile, Reconciler};
use kit_bootstrap::{BootstrapSequencer, ClusterApi};
use kit_cloud::CloudClients;
use kit_core::{ControlPlane, ControlPlaneSpec, GroupVersionKind, ResourceEvent, ResourceKey, Spec};
use kit_storage::StateStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One reconciler per record kind, the control plane first
pub fn build_reconcilers(ctx: Context, sequencer: BootstrapSequencer) -> Vec<Arc<dyn Reconcile>> {
    let store = ctx.store.clone();
    vec![
        Arc::new(Reconciler::new(
            store.clone(),
            ControlPlaneController::new(ctx.clone(), sequencer),
        )),
        Arc::new(Reconciler::new(store.clone(), VpcController::new(ctx.clone()))),
        Arc::new(Reconciler::new(store.clone(), BucketController::new(ctx.clone()))),
        Arc::new(Reconciler::new(store.clone(), SubnetController::new(ctx.clone()))),
        Arc::new(Reconciler::new(
            store.clone(),
            InternetGatewayController::new(ctx.clone()),
        )),
        Arc::new(Reconciler::new(store.clone(), ElasticIpController::new(ctx.clone()))),
        Arc::new(Reconciler::new(store.clone(), NatGatewayController::new(ctx.clone()))),
        Arc::new(Reconciler::new(store.clone(), RouteTableController::new(ctx.clone()))),
        Arc::new(Reconciler::new(
            store.clone(),
            SecurityGroupController::new(ctx.clone()),
        )),
        Arc::new(Reconciler::new(store.clone(), RoleController::new(ctx.clone()))),
        Arc::new(Reconciler::new(store.clone(), PolicyController::new(ctx.clone()))),
        Arc::new(Reconciler::new(
            store.clone(),
            InstanceProfileController::new(ctx.clone()),
        )),
        Arc::new(Reconciler::new(
            store.clone(),
            LaunchTemplateController::new(ctx.clone()),
        )),
        Arc::new(Reconciler::new(
            store.clone(),
            AutoScalingGroupController::new(ctx.clone()),
        )),
        Arc::new(Reconciler::new(store.clone(), TargetGroupController::new(ctx.clone()))),
        Arc::new(Reconciler::new(store, LoadBalancerController::new(ctx))),
    ]
}

/// Key of a stored record, read from its metadata
fn record_key(gvk: &GroupVersionKind, record: &Value) -> Option<ResourceKey> {
    let name = record["metadata"]["name"].as_str()?;
    let namespace = record["metadata"]["namespace"]
        .as_str()
        .unwrap_or(kit_core::DEFAULT_NAMESPACE);
    Some(ResourceKey::new(gvk.clone(), namespace, name))
}

type Limiter = Arc<dyn RateLimiter<ResourceKey>>;

/// Work queue and backoff state of one record kind
struct KindQueue {
    queue: Arc<WorkQueue<ResourceKey>>,
    limiter: Limiter,
}

/// Runs every reconciler until cancelled
pub struct Manager {
    store: StateStore,
    config: ManagerConfig,
    reconcilers: Vec<Arc<dyn Reconcile>>,
    ready: AtomicBool,
}

impl Manager {
    pub fn new(
        store: StateStore,
        clouds: CloudClients,
        cluster_api: Arc<dyn ClusterApi>,
        config: ManagerConfig,
    ) -> Self {
        let sequencer = BootstrapSequencer::new(
            config.bootstrap.clone(),
            clouds.compute.clone(),
            clouds.object_storage.clone(),
            cluster_api,
        );
        let ctx = Context::new(store.clone(), clouds, config.provisioning.clone());
        Self {
            reconcilers: build_reconcilers(ctx, sequencer),
            store,
            config,
            ready: AtomicBool::new(false),
        }
    }

    /// Whether workers are running and the initial listing is queued
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Route store events to the work queues until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting manager: {} kinds, {} workers each",
            self.reconcilers.len(),
            self.config.workers
        );

        // Subscribe before the initial listing so no change slips between them
        let mut events = self.store.subscribe();

        let mut queues = HashMap::new();
        let mut workers = JoinSet::new();
        for reconciler in &self.reconcilers {
            let kind = KindQueue {
                queue: WorkQueue::new(),
                limiter: Arc::new(default_rate_limiter(&self.config.rate_limiter)),
            };
            for _ in 0..self.config.workers.max(1) {
                workers.spawn(worker(
                    reconciler.clone(),
                    kind.queue.clone(),
                    kind.limiter.clone(),
                    token.clone(),
                ));
            }
            queues.insert(reconciler.kind(), kind);
        }

        let result = self.watch(&queues, &mut events, &token).await;

        for kind in queues.values() {
            kind.queue.shutdown();
        }
        while workers.join_next().await.is_some() {}
        self.ready.store(false, Ordering::SeqCst);
        info!("Manager stopped");
        result
    }

    async fn watch(
        &self,
        queues: &HashMap<&'static str, KindQueue>,
        events: &mut tokio::sync::broadcast::Receiver<ResourceEvent>,
        token: &CancellationToken,
    ) -> Result<()> {
        self.enqueue_all(queues)?;
        self.ready.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Manager shutting down");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Ok(event) => self.route(queues, &event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} store events, requeueing every record", missed);
                        self.enqueue_all(queues)?;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Store event channel closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Queue the record an event is about, and its owning ControlPlane
    fn route(&self, queues: &HashMap<&'static str, KindQueue>, event: &ResourceEvent) {
        let Some(kind) = queues.get(event.kind()) else {
            return;
        };
        kind.queue.add(event.resource_key.clone());

        if event.kind() == ControlPlaneSpec::KIND {
            return;
        }
        if let (Some(owner), Some(cp)) = (event.cluster_label(), queues.get(ControlPlaneSpec::KIND)) {
            cp.queue
                .add(ControlPlane::key_for(&event.resource_key.namespace, owner));
        }
    }

    /// Queue every stored record of every kind
    fn enqueue_all(&self, queues: &HashMap<&'static str, KindQueue>) -> Result<()> {
        let mut queued = 0;
        for (kind, entry) in queues {
            let gvk = GroupVersionKind::kit(*kind);
            for record in self.store.list_raw(&gvk, None)? {
                if let Some(key) = record_key(&gvk, &record) {
                    entry.queue.add(key);
                    queued += 1;
                }
            }
        }
        debug!("Queued {} stored records", queued);
        Ok(())
    }
}

/// Take keys off one kind's queue until it shuts down
async fn worker(
    reconciler: Arc<dyn Reconcile>,
    queue: Arc<WorkQueue<ResourceKey>>,
    limiter: Limiter,
    token: CancellationToken,
) {
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key, &token).await {
            Ok(Action::AwaitChange) => limiter.forget(&key),
            Ok(Action::Requeue(after)) => {
                limiter.forget(&key);
                queue.add_after(key.clone(), after);
            }
            Err(ReconcileError::Cancelled) => {}
            Err(_) => {
                let delay = limiter.when(&key);
                debug!("Retrying {} in {:?}", key, delay);
                queue.add_after(key.clone(), delay);
            }
        }
        queue.done(&key);
    }
}
