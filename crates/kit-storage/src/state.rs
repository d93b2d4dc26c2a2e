use crate::patch::merge_diff;
use crate::{KVStore, Result, StorageError, Transaction};
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kit_core::{
    GroupVersionKind, Object, Resource, ResourceEvent, ResourceKey, Spec, WatchEventType,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};
use uuid::Uuid;

/// Default capacity of the change notification channel
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// Record store shared by every controller.
///
/// Records are stored as JSON documents keyed by their storage key. Every
/// committed write advances a store-wide revision, stamps it into
/// `metadata.resourceVersion` and publishes a change event.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KVStore>,
    events: broadcast::Sender<ResourceEvent>,
}

impl StateStore {
    /// Store over `kv` whose change channel buffers `capacity` events
    pub fn new(kv: Arc<dyn KVStore>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { kv, events }
    }

    /// Receive every change committed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }

    /// Change events as a stream; a lagged receiver yields an error item
    pub fn watch(&self) -> BroadcastStream<ResourceEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Fetch a record as a raw JSON document
    pub fn get_raw(&self, key: &ResourceKey) -> Result<Option<Value>> {
        debug!("Getting record: {}", key);
        match self.kv.get(key.storage_key().as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Fetch a typed record
    pub fn get<S: Spec>(&self, namespace: &str, name: &str) -> Result<Option<Object<S>>> {
        self.get_by_key(&Object::<S>::key_for(namespace, name))
    }

    pub fn get_by_key<S: Spec>(&self, key: &ResourceKey) -> Result<Option<Object<S>>> {
        match self.get_raw(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Records of a kind in key order, across namespaces unless one is given
    pub fn list_raw(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Vec<Value>> {
        let prefix = match namespace {
            Some(ns) => format!("{}{}/", gvk.storage_prefix(), ns),
            None => gvk.storage_prefix(),
        };
        let results = self.kv.scan(prefix.as_bytes())?;

        let mut records = Vec::with_capacity(results.len());
        for (_key, data) in results.iter() {
            records.push(serde_json::from_slice(data)?);
        }

        debug!("Found {} {} records", records.len(), gvk.kind);
        Ok(records)
    }

    pub fn list<S: Spec>(&self, namespace: Option<&str>) -> Result<Vec<Object<S>>> {
        self.list_raw(&Object::<S>::type_gvk(), namespace)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StorageError::from))
            .collect()
    }

    /// Store a new record, assigning uid, creation timestamp and generation
    pub fn create<S: Spec>(&self, mut object: Object<S>) -> Result<Object<S>> {
        let key = object.key();
        object
            .validate()
            .map_err(|e| StorageError::invalid_record(key.to_string(), e.to_string()))?;

        info!("Creating record: {}", key);

        let txn = self.kv.transaction()?;
        if txn.get(key.storage_key().as_bytes())?.is_some() {
            return Err(StorageError::already_exists(key.to_string()));
        }

        object.api_version = object.api_version();
        object.kind = S::KIND.to_string();
        object.set_uid(Uuid::new_v4().to_string());
        object.metadata.creation_timestamp = Some(Time(Utc::now()));
        object.metadata.generation = Some(1);
        object.metadata.deletion_timestamp = None;

        let stored = self.commit_put(txn, &key, serde_json::to_value(&object)?, WatchEventType::Added)?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Create the record, or bring an existing record's spec and labels in
    /// line with `object`.
    ///
    /// Status and finalizers of an existing record are left alone; a spec
    /// change bumps the generation. Records that are being deleted are
    /// returned unchanged.
    pub fn apply<S: Spec>(&self, object: Object<S>) -> Result<Object<S>> {
        let key = object.key();
        let Some(mut existing) = self.get_by_key::<S>(&key)? else {
            return self.create(object);
        };

        if existing.is_deleting()
            || (existing.spec == object.spec && existing.metadata.labels == object.metadata.labels)
        {
            return Ok(existing);
        }

        info!("Updating record: {}", key);

        let spec_changed = existing.spec != object.spec;
        existing.spec = object.spec;
        existing.metadata.labels = object.metadata.labels;
        if spec_changed {
            existing.metadata.generation = Some(existing.metadata.generation.unwrap_or(0) + 1);
        }

        let txn = self.kv.transaction()?;
        let stored =
            self.commit_put(txn, &key, serde_json::to_value(&existing)?, WatchEventType::Modified)?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Persist the difference between two snapshots of a record's status.
    ///
    /// The difference is applied as a merge patch to the stored record, so
    /// fields written concurrently by other writers survive. Returns whether
    /// anything was written.
    pub fn merge_status_patch<S: Spec>(
        &self,
        key: &ResourceKey,
        baseline: &S::Status,
        current: &S::Status,
    ) -> Result<bool> {
        let baseline = serde_json::to_value(baseline)?;
        let current = serde_json::to_value(current)?;
        match merge_diff(&baseline, &current) {
            Some(patch) => self.patch_status(key, &patch),
            None => {
                debug!("Status of {} unchanged, skipping write", key);
                Ok(false)
            }
        }
    }

    /// Apply a merge patch to the stored status of a record
    pub fn patch_status(&self, key: &ResourceKey, patch: &Value) -> Result<bool> {
        let txn = self.kv.transaction()?;
        let mut record = read(txn.as_ref(), key)?;

        let original = record.clone();
        let status = record_field(&mut record, "status")?;
        json_patch::merge(status, patch);
        if record == original {
            return Ok(false);
        }

        debug!("Patching status of {}", key);
        self.commit_put(txn, key, record, WatchEventType::Modified)?;
        Ok(true)
    }

    /// Add a finalizer; returns whether the record changed
    pub fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<bool> {
        let txn = self.kv.transaction()?;
        let mut record = read(txn.as_ref(), key)?;
        let mut meta = metadata(&record)?;

        let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(false);
        }
        finalizers.push(finalizer.to_string());

        debug!("Adding finalizer {} to {}", finalizer, key);
        set_metadata(&mut record, &meta)?;
        self.commit_put(txn, key, record, WatchEventType::Modified)?;
        Ok(true)
    }

    /// Remove a finalizer. Removing the last finalizer of a record marked
    /// for deletion deletes the record.
    pub fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<bool> {
        let txn = self.kv.transaction()?;
        let mut record = match read(txn.as_ref(), key) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let mut meta = metadata(&record)?;

        let Some(finalizers) = meta.finalizers.as_mut() else {
            return Ok(false);
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        if finalizers.len() == before {
            return Ok(false);
        }

        debug!("Removing finalizer {} from {}", finalizer, key);
        if finalizers.is_empty() && meta.deletion_timestamp.is_some() {
            self.commit_delete(txn, key, record)?;
        } else {
            if finalizers.is_empty() {
                meta.finalizers = None;
            }
            set_metadata(&mut record, &meta)?;
            self.commit_put(txn, key, record, WatchEventType::Modified)?;
        }
        Ok(true)
    }

    /// Request deletion of a record.
    ///
    /// A record without finalizers is removed at once; otherwise it is
    /// stamped with a deletion timestamp and stays until its finalizers are
    /// removed. Returns false when the record does not exist.
    pub fn mark_deleted(&self, key: &ResourceKey) -> Result<bool> {
        let txn = self.kv.transaction()?;
        let mut record = match read(txn.as_ref(), key) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let mut meta = metadata(&record)?;

        if meta.finalizers.as_ref().is_none_or(|f| f.is_empty()) {
            info!("Deleting record: {}", key);
            self.commit_delete(txn, key, record)?;
            return Ok(true);
        }

        if meta.deletion_timestamp.is_none() {
            info!("Marking record for deletion: {}", key);
            meta.deletion_timestamp = Some(Time(Utc::now()));
            set_metadata(&mut record, &meta)?;
            self.commit_put(txn, key, record, WatchEventType::Modified)?;
        }
        Ok(true)
    }

    fn commit_put(
        &self,
        mut txn: Box<dyn Transaction>,
        key: &ResourceKey,
        mut record: Value,
        event_type: WatchEventType,
    ) -> Result<Value> {
        let revision = txn.next_revision()?.to_string();
        record_field(&mut record, "metadata")?
            .as_object_mut()
            .ok_or_else(|| StorageError::serialization_error("metadata is not an object", None))?
            .insert("resourceVersion".to_string(), Value::String(revision.clone()));

        txn.put(key.storage_key().as_bytes(), &serde_json::to_vec(&record)?)?;
        txn.commit()?;

        debug!("Committed {} at revision {}", key, revision);
        self.publish(ResourceEvent::new(event_type, key.clone(), record.clone(), revision));
        Ok(record)
    }

    fn commit_delete(
        &self,
        mut txn: Box<dyn Transaction>,
        key: &ResourceKey,
        record: Value,
    ) -> Result<()> {
        let revision = txn.next_revision()?.to_string();
        txn.delete(key.storage_key().as_bytes())?;
        txn.commit()?;

        info!("Deleted record: {} at revision {}", key, revision);
        self.publish(ResourceEvent::new(
            WatchEventType::Deleted,
            key.clone(),
            record,
            revision,
        ));
        Ok(())
    }

    fn publish(&self, event: ResourceEvent) {
        // No receivers is fine; controllers resync from the store on startup
        let _ = self.events.send(event);
    }
}

fn read(txn: &dyn Transaction, key: &ResourceKey) -> Result<Value> {
    let data = txn
        .get(key.storage_key().as_bytes())?
        .ok_or_else(|| StorageError::not_found(key.to_string()))?;
    Ok(serde_json::from_slice(&data)?)
}

fn record_field<'a>(record: &'a mut Value, field: &str) -> Result<&'a mut Value> {
    let object = record
        .as_object_mut()
        .ok_or_else(|| StorageError::serialization_error("record is not a JSON object", None))?;
    let value = object
        .entry(field)
        .or_insert_with(|| Value::Object(Default::default()));
    if value.is_null() {
        *value = Value::Object(Default::default());
    }
    Ok(value)
}

fn metadata(record: &Value) -> Result<ObjectMeta> {
    Ok(serde_json::from_value(
        record.get("metadata").cloned().unwrap_or_default(),
    )?)
}

fn set_metadata(record: &mut Value, meta: &ObjectMeta) -> Result<()> {
    *record_field(record, "metadata")? = serde_json::to_value(meta)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RedbBackend;
    use futures_util::StreamExt;
    use kit_core::resources::{ControlPlane, ControlPlaneSpec, Vpc, VpcSpec};
    use kit_core::ResourceStatus;
    use serde_json::json;

    fn make_store() -> StateStore {
        StateStore::new(Arc::new(RedbBackend::in_memory().unwrap()), 64)
    }

    fn make_vpc(name: &str) -> Vpc {
        Vpc::new(
            "default",
            name,
            VpcSpec {
                cluster_name: "demo".to_string(),
                cidr: "10.0.0.0/16".to_string(),
            },
        )
    }

    fn revision<S: Spec>(object: &Object<S>) -> u64 {
        object
            .metadata
            .resource_version
            .as_deref()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_create_assigns_identity() {
        let store = make_store();
        let vpc = store.create(make_vpc("demo")).unwrap();

        assert!(vpc.metadata.uid.is_some());
        assert!(vpc.metadata.creation_timestamp.is_some());
        assert_eq!(vpc.metadata.generation, Some(1));
        assert_eq!(revision(&vpc), 1);

        let fetched: Vpc = store.get("default", "demo").unwrap().unwrap();
        assert_eq!(fetched, vpc);
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_names() {
        let store = make_store();
        store.create(make_vpc("demo")).unwrap();

        let err = store.create(make_vpc("demo")).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        let err = store.create(make_vpc("Not_Valid")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }));
    }

    #[test]
    fn test_resource_version_is_monotonic() {
        let store = make_store();
        let a = store.create(make_vpc("a")).unwrap();
        let b = store.create(make_vpc("b")).unwrap();
        store
            .patch_status(&a.key(), &json!({"vpcId": "vpc-1"}))
            .unwrap();
        let a2: Vpc = store.get_by_key(&a.key()).unwrap().unwrap();

        assert!(revision(&a) < revision(&b));
        assert!(revision(&b) < revision(&a2));
    }

    #[test]
    fn test_apply_bumps_generation_only_on_spec_change() {
        let store = make_store();
        let vpc = store.apply(make_vpc("demo")).unwrap();
        assert_eq!(vpc.metadata.generation, Some(1));

        let same = store.apply(make_vpc("demo")).unwrap();
        assert_eq!(revision(&same), revision(&vpc));

        let mut changed = make_vpc("demo");
        changed.spec.cidr = "10.1.0.0/16".to_string();
        let updated = store.apply(changed).unwrap();
        assert_eq!(updated.metadata.generation, Some(2));
        assert_eq!(updated.spec.cidr, "10.1.0.0/16");
        assert_eq!(updated.metadata.uid, vpc.metadata.uid);
    }

    #[test]
    fn test_merge_status_keeps_concurrent_writes() {
        let store = make_store();
        let cp = store
            .create(ControlPlane::new("default", "demo", ControlPlaneSpec::default()))
            .unwrap();
        let baseline = cp.status.clone();

        // Another writer publishes a handle after the snapshot was taken
        store
            .patch_status(&cp.key(), &json!({"infrastructure": {"vpcId": "vpc-1"}}))
            .unwrap();

        let mut current = baseline.clone();
        current.bootstrap.etcd_staged = true;
        assert!(store
            .merge_status_patch::<ControlPlaneSpec>(&cp.key(), &baseline, &current)
            .unwrap());

        let stored: ControlPlane = store.get_by_key(&cp.key()).unwrap().unwrap();
        assert_eq!(stored.status.infrastructure.vpc_id.as_deref(), Some("vpc-1"));
        assert!(stored.status.bootstrap.etcd_staged);
    }

    #[test]
    fn test_merge_status_without_changes_is_noop() {
        let store = make_store();
        let vpc = store.create(make_vpc("demo")).unwrap();
        let mut rx = store.subscribe();

        let written = store
            .merge_status_patch::<VpcSpec>(&vpc.key(), &vpc.status, &vpc.status)
            .unwrap();
        assert!(!written);
        assert!(rx.try_recv().is_err());
        assert_eq!(vpc.status.conditions().len(), 0);
    }

    #[test]
    fn test_delete_without_finalizers_removes_record() {
        let store = make_store();
        let vpc = store.create(make_vpc("demo")).unwrap();

        assert!(store.mark_deleted(&vpc.key()).unwrap());
        assert!(store.get_by_key::<VpcSpec>(&vpc.key()).unwrap().is_none());
        assert!(!store.mark_deleted(&vpc.key()).unwrap());
    }

    #[test]
    fn test_finalizer_blocks_deletion_until_removed() {
        let store = make_store();
        let vpc = store.create(make_vpc("demo")).unwrap();
        let key = vpc.key();

        assert!(store.add_finalizer(&key, "kit.k8s.amazonaws.com/vpc").unwrap());
        assert!(!store.add_finalizer(&key, "kit.k8s.amazonaws.com/vpc").unwrap());

        store.mark_deleted(&key).unwrap();
        let marked: Vpc = store.get_by_key(&key).unwrap().unwrap();
        assert!(marked.is_deleting());

        assert!(store.remove_finalizer(&key, "kit.k8s.amazonaws.com/vpc").unwrap());
        assert!(store.get_by_key::<VpcSpec>(&key).unwrap().is_none());
    }

    #[test]
    fn test_apply_does_not_touch_deleting_record() {
        let store = make_store();
        let vpc = store.create(make_vpc("demo")).unwrap();
        store.add_finalizer(&vpc.key(), "f").unwrap();
        store.mark_deleted(&vpc.key()).unwrap();

        let mut changed = make_vpc("demo");
        changed.spec.cidr = "10.9.0.0/16".to_string();
        let result = store.apply(changed).unwrap();
        assert_eq!(result.spec.cidr, "10.0.0.0/16");
    }

    #[test]
    fn test_list_is_scoped_to_kind() {
        let store = make_store();
        store.create(make_vpc("a")).unwrap();
        store.create(make_vpc("b")).unwrap();
        store
            .create(ControlPlane::new("default", "demo", ControlPlaneSpec::default()))
            .unwrap();

        let vpcs: Vec<Vpc> = store.list(None).unwrap();
        assert_eq!(store.list::<VpcSpec>(Some("other")).unwrap().len(), 0);
        assert_eq!(vpcs.len(), 2);
        assert_eq!(vpcs[0].name(), "a");
    }

    #[tokio::test]
    async fn test_watch_sees_lifecycle_events() {
        let store = make_store();
        let mut stream = store.watch();

        let vpc = store.create(make_vpc("demo")).unwrap();
        store.mark_deleted(&vpc.key()).unwrap();

        let added = stream.next().await.unwrap().unwrap();
        assert_eq!(added.event_type, WatchEventType::Added);
        assert_eq!(added.cluster_label(), Some("demo"));

        let deleted = stream.next().await.unwrap().unwrap();
        assert_eq!(deleted.event_type, WatchEventType::Deleted);
        assert_eq!(deleted.kind(), "Vpc");
    }
}
