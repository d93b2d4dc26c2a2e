use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use chrono::Utc;
use kit_core::conditions::{mark_active, mark_inactive};
use kit_core::naming::finalizer;
use kit_core::{Object, ResourceKey, ResourceStatus, Spec};
use kit_storage::StateStore;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What to do with a key after a pass that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Look again after the delay
    Requeue(Duration),
    /// Nothing to do until the record or one it depends on changes
    AwaitChange,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Action::Requeue(after)
    }

    pub fn await_change() -> Self {
        Action::AwaitChange
    }
}

/// Convergence logic for one record kind
///
/// `reconcile` brings the cloud in line with the record; `finalize` tears
/// down what it created. A finalize returning `AwaitChange` is complete and
/// releases the record; `Requeue` means teardown is still in progress.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    type Spec: Spec;

    /// Controller name; also names the finalizer it owns
    fn name(&self) -> &'static str;

    async fn reconcile(&self, object: &mut Object<Self::Spec>) -> Result<Action>;

    async fn finalize(&self, object: &mut Object<Self::Spec>) -> Result<Action>;
}

/// Kind-erased entry point the manager's workers call
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Record kind this reconciler serves
    fn kind(&self) -> &'static str;

    async fn reconcile(&self, key: &ResourceKey, cancel: &CancellationToken) -> Result<Action>;
}

/// Drives a controller through fetch, reconcile or finalize, and the status
/// write for one record per call
pub struct Reconciler<C: Controller> {
    store: StateStore,
    controller: C,
    finalizer: String,
}

impl<C: Controller> Reconciler<C> {
    pub fn new(store: StateStore, controller: C) -> Self {
        let finalizer = finalizer(controller.name());
        Self {
            store,
            controller,
            finalizer,
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// One pass over the record at `key`
    pub async fn run(&self, key: &ResourceKey, cancel: &CancellationToken) -> Result<Action> {
        let Some(mut object) = self.store.get_by_key::<C::Spec>(key)? else {
            debug!("{} no longer exists, nothing to do", key);
            return Ok(Action::AwaitChange);
        };
        let baseline = object.status.clone();

        if object.is_deleting() {
            return self.finalize(key, object, baseline, cancel).await;
        }

        if !object.has_finalizer(&self.finalizer) {
            self.store.add_finalizer(key, &self.finalizer)?;
        }

        let result = cancellable(cancel, self.controller.reconcile(&mut object)).await;
        if matches!(result, Err(ReconcileError::Cancelled)) {
            debug!("Reconcile of {} cancelled, status not persisted", key);
            return result;
        }

        match &result {
            Ok(_) => mark_active(object.status.conditions_mut(), Utc::now()),
            Err(e) => self.record_failure(key, &mut object, e),
        }
        self.store
            .merge_status_patch::<C::Spec>(key, &baseline, &object.status)?;
        result
    }

    async fn finalize(
        &self,
        key: &ResourceKey,
        mut object: Object<C::Spec>,
        baseline: <C::Spec as Spec>::Status,
        cancel: &CancellationToken,
    ) -> Result<Action> {
        if !object.has_finalizer(&self.finalizer) {
            debug!("{} is being deleted and holds no {} finalizer", key, self.finalizer);
            return Ok(Action::AwaitChange);
        }

        let result = cancellable(cancel, self.controller.finalize(&mut object)).await;
        match &result {
            Ok(Action::AwaitChange) => {
                self.store.remove_finalizer(key, &self.finalizer)?;
                info!("Finalized {}", key);
                return result;
            }
            Ok(Action::Requeue(after)) => {
                debug!("Teardown of {} still in progress, checking again in {:?}", key, after);
            }
            Err(ReconcileError::Cancelled) => return result,
            Err(e) => self.record_failure(key, &mut object, e),
        }
        self.store
            .merge_status_patch::<C::Spec>(key, &baseline, &object.status)?;
        result
    }

    fn record_failure(&self, key: &ResourceKey, object: &mut Object<C::Spec>, err: &ReconcileError) {
        if err.is_dependency_not_ready() {
            debug!("{}", err);
        } else {
            error!("Failed to reconcile {}: {}", key, err);
        }
        mark_inactive(
            object.status.conditions_mut(),
            err.reason(),
            &err.to_string(),
            Utc::now(),
        );
    }
}

/// Race a pass against shutdown; a cancelled pass is dropped mid-flight
async fn cancellable<T>(
    cancel: &CancellationToken,
    pass: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        result = pass => result,
    }
}

#[async_trait]
impl<C: Controller> Reconcile for Reconciler<C> {
    fn kind(&self) -> &'static str {
        C::Spec::KIND
    }

    async fn reconcile(&self, key: &ResourceKey, cancel: &CancellationToken) -> Result<Action> {
        self.run(key, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kit_core::conditions::{find_condition, ACTIVE};
    use kit_core::resources::network::VpcStatus;
    use kit_core::resources::{Vpc, VpcSpec};
    use kit_storage::RedbBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted controller: hands out a vpc id, or fails, or blocks forever
    #[derive(Default)]
    struct FakeController {
        fail: bool,
        hang: bool,
        finalize_pending: bool,
        reconciles: AtomicUsize,
        finalizes: AtomicUsize,
    }

    #[async_trait]
    impl Controller for FakeController {
        type Spec = VpcSpec;

        fn name(&self) -> &'static str {
            "vpc"
        }

        async fn reconcile(&self, object: &mut Object<VpcSpec>) -> Result<Action> {
            self.reconciles.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(ReconcileError::dependency_not_ready(
                    object.key().to_string(),
                    "infrastructure.vpcId",
                ));
            }
            object.status.vpc_id = Some("vpc-1".to_string());
            Ok(Action::AwaitChange)
        }

        async fn finalize(&self, _object: &mut Object<VpcSpec>) -> Result<Action> {
            self.finalizes.fetch_add(1, Ordering::SeqCst);
            if self.finalize_pending {
                return Ok(Action::requeue(Duration::from_secs(5)));
            }
            Ok(Action::AwaitChange)
        }
    }

    fn make_store() -> StateStore {
        StateStore::new(Arc::new(RedbBackend::in_memory().unwrap()), 64)
    }

    fn make_vpc(store: &StateStore) -> ResourceKey {
        let vpc = Vpc::new(
            "default",
            "demo",
            VpcSpec {
                cluster_name: "demo".to_string(),
                cidr: "10.0.0.0/16".to_string(),
            },
        );
        store.create(vpc).unwrap().key()
    }

    fn status(store: &StateStore, key: &ResourceKey) -> VpcStatus {
        store.get_by_key::<VpcSpec>(key).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_missing_record_is_a_noop() {
        let store = make_store();
        let reconciler = Reconciler::new(store, FakeController::default());
        let key = Vpc::key_for("default", "absent");

        let action = reconciler.run(&key, &CancellationToken::new()).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert_eq!(reconciler.controller().reconciles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_adds_finalizer_and_marks_active() {
        let store = make_store();
        let key = make_vpc(&store);
        let reconciler = Reconciler::new(store.clone(), FakeController::default());

        reconciler.run(&key, &CancellationToken::new()).await.unwrap();

        let vpc = store.get_by_key::<VpcSpec>(&key).unwrap().unwrap();
        assert!(vpc.has_finalizer("kit.k8s.amazonaws.com/vpc"));
        assert!(vpc.is_active());
        assert_eq!(vpc.status.vpc_id.as_deref(), Some("vpc-1"));
    }

    #[tokio::test]
    async fn test_failure_marks_inactive_with_reason() {
        let store = make_store();
        let key = make_vpc(&store);
        let controller = FakeController {
            fail: true,
            ..Default::default()
        };
        let reconciler = Reconciler::new(store.clone(), controller);

        let err = reconciler
            .run(&key, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_dependency_not_ready());

        let status = status(&store, &key);
        let active = find_condition(&status.conditions, ACTIVE).unwrap();
        assert_eq!(active.status, "False");
        assert_eq!(active.reason, "DependencyNotReady");
        assert!(status.vpc_id.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_pass_persists_nothing() {
        let store = make_store();
        let key = make_vpc(&store);
        let controller = FakeController {
            hang: true,
            ..Default::default()
        };
        let reconciler = Reconciler::new(store.clone(), controller);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = reconciler.run(&key, &cancel).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled));
        assert!(status(&store, &key).conditions.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_removes_finalizer_and_record() {
        let store = make_store();
        let key = make_vpc(&store);
        let reconciler = Reconciler::new(store.clone(), FakeController::default());
        reconciler.run(&key, &CancellationToken::new()).await.unwrap();

        store.mark_deleted(&key).unwrap();
        reconciler.run(&key, &CancellationToken::new()).await.unwrap();

        assert_eq!(reconciler.controller().finalizes.load(Ordering::SeqCst), 1);
        assert!(store.get_by_key::<VpcSpec>(&key).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_finalize_keeps_record() {
        let store = make_store();
        let key = make_vpc(&store);
        let controller = FakeController {
            finalize_pending: true,
            ..Default::default()
        };
        let reconciler = Reconciler::new(store.clone(), controller);
        reconciler.run(&key, &CancellationToken::new()).await.unwrap();

        store.mark_deleted(&key).unwrap();
        let action = reconciler.run(&key, &CancellationToken::new()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        let vpc = store.get_by_key::<VpcSpec>(&key).unwrap().unwrap();
        assert!(vpc.is_deleting());
        assert!(vpc.has_finalizer("kit.k8s.amazonaws.com/vpc"));
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let store = make_store();
        let key = make_vpc(&store);
        let reconciler = Reconciler::new(store.clone(), FakeController::default());
        reconciler.run(&key, &CancellationToken::new()).await.unwrap();

        let before = store.get_by_key::<VpcSpec>(&key).unwrap().unwrap();
        reconciler.run(&key, &CancellationToken::new()).await.unwrap();
        let after = store.get_by_key::<VpcSpec>(&key).unwrap().unwrap();

        assert_eq!(
            before.metadata.resource_version,
            after.metadata.resource_version
        );
    }
}
