//! 内存版集群
//!
//! [`FakeClusterClient`] 同时实现 [`ClusterClient`] 与 [`EventRecorder`]，模拟
//! API server 的关键语义：UID 分配、resourceVersion 乐观并发、finalizer 阻塞删除、
//! 基于 ownerReferences 的级联删除与等值标签选择器。测试通过辅助方法模拟
//! 外部控制器（PV 绑定、工作 Pod、快照控制器）的行为。

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cdi_common::consts::CDI_CONFIG_NAME;
use cdi_common::quantity::parse_quantity;
use cdi_common::{
    CDIConfig, Error, Result, StorageProfile, VolumeCloneSource, VolumeSnapshot,
    VolumeSnapshotClass, VolumeSnapshotContent,
};
use k8s_openapi::api::core::v1::{
    Event, ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimStatus,
    PersistentVolumeSpec, Pod,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::chrono::Utc;
use kube::Resource;

use crate::client::ClusterClient;
use crate::events::{CloneEvent, EventRecorder, EventType};
use crate::utils::{matches_selector, volume_name, RESOURCE_STORAGE};

type Key = (String, String);
type Store<K> = BTreeMap<Key, K>;

#[derive(Default)]
struct FakeState {
    pvcs: Store<PersistentVolumeClaim>,
    pvs: Store<PersistentVolume>,
    pods: Store<Pod>,
    snapshots: Store<VolumeSnapshot>,
    snapshot_contents: Store<VolumeSnapshotContent>,
    snapshot_classes: Store<VolumeSnapshotClass>,
    storage_classes: Store<StorageClass>,
    storage_profiles: Store<StorageProfile>,
    clone_sources: Store<VolumeCloneSource>,
    cdi_config: Option<CDIConfig>,
    events: Vec<Event>,
    version: u64,
    writes: usize,
    quota_exceeded: bool,
    snapshot_api: bool,
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn describe(kind: &str, key: &Key) -> String {
    if key.0.is_empty() {
        format!("{kind} {}", key.1)
    } else {
        format!("{kind} {}/{}", key.0, key.1)
    }
}

fn bump(meta: &mut ObjectMeta, version: &mut u64) {
    *version += 1;
    meta.resource_version = Some(version.to_string());
}

fn create_in<K: Resource + Clone>(
    store: &mut Store<K>,
    version: &mut u64,
    kind: &str,
    obj: &K,
) -> Result<K> {
    let key = key_of(obj);
    if key.1.is_empty() {
        return Err(Error::validation(format!("{kind} name is required")));
    }
    if store.contains_key(&key) {
        return Err(Error::AlreadyExists(describe(kind, &key)));
    }
    let mut obj = obj.clone();
    let meta = obj.meta_mut();
    meta.uid = Some(uuid::Uuid::new_v4().to_string());
    meta.creation_timestamp = Some(Time(Utc::now()));
    meta.deletion_timestamp = None;
    bump(meta, version);
    store.insert(key, obj.clone());
    Ok(obj)
}

fn replace_in<K: Resource + Clone>(
    store: &mut Store<K>,
    version: &mut u64,
    kind: &str,
    obj: &K,
) -> Result<(K, Option<String>)> {
    let key = key_of(obj);
    let current = store
        .get(&key)
        .ok_or_else(|| Error::NotFound(describe(kind, &key)))?;
    let current_meta = current.meta();
    if let Some(rv) = obj.meta().resource_version.as_deref() {
        if Some(rv) != current_meta.resource_version.as_deref() {
            return Err(Error::Conflict(describe(kind, &key)));
        }
    }
    let uid = current_meta.uid.clone();
    let created = current_meta.creation_timestamp.clone();
    let deleted = current_meta.deletion_timestamp.clone();

    let mut obj = obj.clone();
    let meta = obj.meta_mut();
    meta.uid = uid.clone();
    meta.creation_timestamp = created;
    meta.deletion_timestamp = deleted;
    bump(meta, version);

    let finalized = meta.deletion_timestamp.is_some()
        && meta.finalizers.as_ref().map(|f| f.is_empty()).unwrap_or(true);
    if finalized {
        store.remove(&key);
        return Ok((obj, uid));
    }
    store.insert(key, obj.clone());
    Ok((obj, None))
}

/// 删除对象；有 finalizer 时只打上删除时间戳。返回真正移除的对象 UID
fn delete_in<K: Resource + Clone>(store: &mut Store<K>, version: &mut u64, key: &Key) -> Option<String> {
    let obj = store.get_mut(key)?;
    let has_finalizers = obj
        .meta()
        .finalizers
        .as_ref()
        .map(|f| !f.is_empty())
        .unwrap_or(false);
    if has_finalizers {
        let meta = obj.meta_mut();
        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Time(Utc::now()));
            bump(meta, version);
        }
        return None;
    }
    store.remove(key).and_then(|o| o.meta().uid.clone())
}

/// 直接写入对象，已有 UID 时保留
fn insert_stamped<K: Resource + Clone>(store: &mut Store<K>, version: &mut u64, mut obj: K) -> K {
    let meta = obj.meta_mut();
    if meta.uid.is_none() {
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
    }
    bump(meta, version);
    store.insert(key_of(&obj), obj.clone());
    obj
}

fn owned_by<K: Resource>(obj: &K, uid: &str) -> bool {
    obj.meta()
        .owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.uid == uid))
        .unwrap_or(false)
}

fn dependents<K: Resource>(store: &Store<K>, uid: &str) -> Vec<Key> {
    store
        .iter()
        .filter(|(_, o)| owned_by(*o, uid))
        .map(|(k, _)| k.clone())
        .collect()
}

impl FakeState {
    /// 模拟 ResourceQuota 准入拒绝
    fn check_quota(&self, resource: &str, meta: &ObjectMeta, quota: &str) -> Result<()> {
        if self.quota_exceeded {
            return Err(Error::QuotaExceeded(format!(
                "{} \"{}\" is forbidden: exceeded quota: {}",
                resource,
                meta.name.as_deref().unwrap_or_default(),
                quota
            )));
        }
        Ok(())
    }

    /// 模拟垃圾回收器：删除所有以 `uid` 为 owner 的对象
    fn collect_garbage(&mut self, uid: String) {
        let mut pending = vec![uid];
        while let Some(uid) = pending.pop() {
            for k in dependents(&self.pvcs, &uid) {
                pending.extend(delete_in(&mut self.pvcs, &mut self.version, &k));
            }
            for k in dependents(&self.pods, &uid) {
                pending.extend(delete_in(&mut self.pods, &mut self.version, &k));
            }
            for k in dependents(&self.snapshots, &uid) {
                pending.extend(delete_in(&mut self.snapshots, &mut self.version, &k));
            }
        }
    }

    fn list_selected<K: Resource + Clone>(store: &Store<K>, namespace: &str, selector: &str) -> Vec<K> {
        store
            .iter()
            .filter(|((ns, _), o)| ns == namespace && matches_selector(*o, selector))
            .map(|(_, o)| o.clone())
            .collect()
    }
}

/// 内存版集群客户端
#[derive(Default)]
pub struct FakeClusterClient {
    state: Mutex<FakeState>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        let client = Self::default();
        client.lock().snapshot_api = true;
        client
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ---- 初始对象 ----

    /// 添加 StorageClass
    pub fn add_storage_class(&self, name: &str, provisioner: &str, wffc: bool, allow_expansion: bool) -> StorageClass {
        let sc = StorageClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            provisioner: provisioner.to_string(),
            volume_binding_mode: Some(if wffc { "WaitForFirstConsumer" } else { "Immediate" }.to_string()),
            allow_volume_expansion: Some(allow_expansion),
            ..Default::default()
        };
        let mut state = self.lock();
        let state = &mut *state;
        insert_stamped(&mut state.storage_classes, &mut state.version, sc)
    }

    pub fn add_storage_profile(&self, profile: StorageProfile) -> StorageProfile {
        let mut state = self.lock();
        let state = &mut *state;
        insert_stamped(&mut state.storage_profiles, &mut state.version, profile)
    }

    pub fn add_snapshot_class(&self, class: VolumeSnapshotClass) -> VolumeSnapshotClass {
        let mut state = self.lock();
        let state = &mut *state;
        insert_stamped(&mut state.snapshot_classes, &mut state.version, class)
    }

    pub fn add_snapshot_content(&self, content: VolumeSnapshotContent) -> VolumeSnapshotContent {
        let mut state = self.lock();
        let state = &mut *state;
        insert_stamped(&mut state.snapshot_contents, &mut state.version, content)
    }

    pub fn set_cdi_config(&self, mut config: CDIConfig) {
        let mut state = self.lock();
        config.metadata.name = Some(CDI_CONFIG_NAME.to_string());
        bump(&mut config.metadata, &mut state.version);
        state.cdi_config = Some(config);
    }

    /// 模拟快照 CRD 未安装
    pub fn disable_snapshot_api(&self) {
        self.lock().snapshot_api = false;
    }

    /// 添加 PVC，分配 UID
    pub fn add_pvc(&self, pvc: PersistentVolumeClaim) -> PersistentVolumeClaim {
        let mut state = self.lock();
        let state = &mut *state;
        match create_in(&mut state.pvcs, &mut state.version, "PersistentVolumeClaim", &pvc) {
            Ok(pvc) => pvc,
            Err(_) => state.pvcs[&key_of(&pvc)].clone(),
        }
    }

    pub fn add_pv(&self, pv: PersistentVolume) -> PersistentVolume {
        let mut state = self.lock();
        let state = &mut *state;
        insert_stamped(&mut state.pvs, &mut state.version, pv)
    }

    pub fn add_volume_snapshot(&self, snapshot: VolumeSnapshot) -> VolumeSnapshot {
        let mut state = self.lock();
        let state = &mut *state;
        match create_in(&mut state.snapshots, &mut state.version, "VolumeSnapshot", &snapshot) {
            Ok(s) => s,
            Err(_) => state.snapshots[&key_of(&snapshot)].clone(),
        }
    }

    pub fn add_volume_clone_source(&self, source: VolumeCloneSource) -> VolumeCloneSource {
        let mut state = self.lock();
        let state = &mut *state;
        match create_in(&mut state.clone_sources, &mut state.version, "VolumeCloneSource", &source) {
            Ok(s) => s,
            Err(_) => state.clone_sources[&key_of(&source)].clone(),
        }
    }

    /// 之后的 PVC、Pod 与快照创建请求是否被配额拒绝
    pub fn set_quota_exceeded(&self, exceeded: bool) {
        self.lock().quota_exceeded = exceeded;
    }

    // ---- 读取 ----

    pub fn pvc(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.lock().pvcs.get(&key(namespace, name)).cloned()
    }

    pub fn pv(&self, name: &str) -> Option<PersistentVolume> {
        self.lock().pvs.get(&key("", name)).cloned()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&key(namespace, name)).cloned()
    }

    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<VolumeSnapshot> {
        self.lock().snapshots.get(&key(namespace, name)).cloned()
    }

    pub fn pvc_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .pvcs
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn snapshot_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .snapshots
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// 通过客户端接口执行的写操作次数
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// 记录在名为 `name` 的对象上的事件
    pub fn events_for(&self, name: &str) -> Vec<CloneEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.involved_object.name.as_deref() == Some(name))
            .map(|e| CloneEvent {
                type_: EventType::parse(e.type_.as_deref()),
                reason: e.reason.clone().unwrap_or_default(),
                message: e.message.clone().unwrap_or_default(),
            })
            .collect()
    }

    // ---- 外部控制器模拟（不经过 CAS，不计入写次数）----

    pub fn update_pvc(&self, namespace: &str, name: &str, f: impl FnOnce(&mut PersistentVolumeClaim)) {
        let mut state = self.lock();
        let state = &mut *state;
        if let Some(pvc) = state.pvcs.get_mut(&key(namespace, name)) {
            f(pvc);
            bump(&mut pvc.metadata, &mut state.version);
        }
    }

    pub fn update_pv(&self, name: &str, f: impl FnOnce(&mut PersistentVolume)) {
        let mut state = self.lock();
        let state = &mut *state;
        if let Some(pv) = state.pvs.get_mut(&key("", name)) {
            f(pv);
            bump(&mut pv.metadata, &mut state.version);
        }
    }

    pub fn update_pod(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Pod)) {
        let mut state = self.lock();
        let state = &mut *state;
        if let Some(pod) = state.pods.get_mut(&key(namespace, name)) {
            f(pod);
            bump(&mut pod.metadata, &mut state.version);
        }
    }

    pub fn update_snapshot(&self, namespace: &str, name: &str, f: impl FnOnce(&mut VolumeSnapshot)) {
        let mut state = self.lock();
        let state = &mut *state;
        if let Some(snap) = state.snapshots.get_mut(&key(namespace, name)) {
            f(snap);
            bump(&mut snap.metadata, &mut state.version);
        }
    }

    /// 用户删除对象
    pub fn delete_pvc_now(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let state = &mut *state;
        if let Some(uid) = delete_in(&mut state.pvcs, &mut state.version, &key(namespace, name)) {
            state.collect_garbage(uid);
        }
    }

    /// 为 PVC 供给并绑定一个 PV，返回 PV 名称
    pub fn provision(&self, namespace: &str, name: &str, capacity: &str) -> Option<String> {
        let pvc = self.pvc(namespace, name)?;
        if let Some(existing) = volume_name(&pvc) {
            return Some(existing.to_string());
        }
        let uid = pvc.metadata.uid.clone()?;
        let pv_name = format!("pvc-{uid}");
        let driver = pvc
            .spec
            .as_ref()
            .and_then(|s| s.storage_class_name.clone())
            .and_then(|sc| self.lock().storage_classes.get(&key("", &sc)).map(|c| c.provisioner.clone()))
            .unwrap_or_default();
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some(pv_name.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                capacity: Some(BTreeMap::from([(
                    RESOURCE_STORAGE.to_string(),
                    Quantity(capacity.to_string()),
                )])),
                claim_ref: Some(ObjectReference {
                    namespace: Some(namespace.to_string()),
                    name: Some(name.to_string()),
                    uid: Some(uid),
                    ..Default::default()
                }),
                csi: Some(k8s_openapi::api::core::v1::CSIPersistentVolumeSource {
                    driver,
                    volume_handle: pv_name.clone(),
                    ..Default::default()
                }),
                storage_class_name: pvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
                ..Default::default()
            }),
            status: None,
        };
        self.add_pv(pv);
        self.run_binder();
        Some(pv_name)
    }

    /// 模拟 PV 控制器：PV 的 claimRef 指向某个未绑定 PVC 时完成双向绑定
    pub fn run_binder(&self) {
        let mut state = self.lock();
        let state = &mut *state;
        let bindings: Vec<(Key, String, Option<Quantity>)> = state
            .pvs
            .values()
            .filter_map(|pv| {
                let spec = pv.spec.as_ref()?;
                let claim_ref = spec.claim_ref.as_ref()?;
                let k = key(claim_ref.namespace.as_deref()?, claim_ref.name.as_deref()?);
                let pvc = state.pvcs.get(&k)?;
                if pvc.metadata.uid != claim_ref.uid || volume_name(pvc).is_some() {
                    return None;
                }
                let capacity = spec.capacity.as_ref().and_then(|c| c.get(RESOURCE_STORAGE)).cloned();
                Some((k, pv.metadata.name.clone()?, capacity))
            })
            .collect();

        for (k, pv_name, capacity) in bindings {
            if let Some(pvc) = state.pvcs.get_mut(&k) {
                pvc.spec.get_or_insert_with(Default::default).volume_name = Some(pv_name);
                let status = pvc.status.get_or_insert_with(PersistentVolumeClaimStatus::default);
                status.phase = Some("Bound".to_string());
                if let Some(capacity) = capacity {
                    status.capacity = Some(BTreeMap::from([(RESOURCE_STORAGE.to_string(), capacity)]));
                }
                bump(&mut pvc.metadata, &mut state.version);
            }
        }
    }

    /// 模拟快照控制器：快照创建完成并可用
    pub fn complete_snapshot(&self, namespace: &str, name: &str, restore_size: &str) {
        self.update_snapshot(namespace, name, |snap| {
            let status = snap.status.get_or_insert_with(Default::default);
            status.creation_time = Some(Time(Utc::now()));
            status.ready_to_use = Some(true);
            status.restore_size = Some(Quantity(restore_size.to_string()));
        });
    }

    /// 模拟扩容控制器：把容量更新为请求大小
    pub fn resize_to_request(&self, namespace: &str, name: &str) {
        self.update_pvc(namespace, name, |pvc| {
            let request = crate::utils::storage_request(pvc).cloned();
            if let (Some(request), Some(status)) = (request, pvc.status.as_mut()) {
                status.capacity = Some(BTreeMap::from([(RESOURCE_STORAGE.to_string(), request)]));
            }
        });
    }

    fn record_write(state: &mut FakeState) {
        state.writes += 1;
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.pvc(namespace, name))
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let mut state = self.lock();
        let state = &mut *state;
        state.check_quota("persistentvolumeclaims", &pvc.metadata, "storage")?;
        Self::record_write(state);
        let mut pvc = pvc.clone();
        if let Some(request) = crate::utils::storage_request(&pvc) {
            parse_quantity(request)?;
        }
        pvc.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        create_in(&mut state.pvcs, &mut state.version, "PersistentVolumeClaim", &pvc)
    }

    async fn replace_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let mut state = self.lock();
        let state = &mut *state;
        Self::record_write(state);
        let (pvc, removed) = replace_in(&mut state.pvcs, &mut state.version, "PersistentVolumeClaim", pvc)?;
        if let Some(uid) = removed {
            state.collect_garbage(uid);
        }
        Ok(pvc)
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let state = &mut *state;
        Self::record_write(state);
        if let Some(uid) = delete_in(&mut state.pvcs, &mut state.version, &key(namespace, name)) {
            state.collect_garbage(uid);
        }
        Ok(())
    }

    async fn list_pvcs(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        Ok(FakeState::list_selected(&self.lock().pvcs, namespace, selector))
    }

    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.pv(name))
    }

    async fn replace_pv(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let mut state = self.lock();
        let state = &mut *state;
        Self::record_write(state);
        replace_in(&mut state.pvs, &mut state.version, "PersistentVolume", pv).map(|(pv, _)| pv)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.pod(namespace, name))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.lock();
        let state = &mut *state;
        state.check_quota("pods", &pod.metadata, "pods")?;
        Self::record_write(state);
        create_in(&mut state.pods, &mut state.version, "Pod", pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let state = &mut *state;
        Self::record_write(state);
        if let Some(uid) = delete_in(&mut state.pods, &mut state.version, &key(namespace, name)) {
            state.collect_garbage(uid);
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        Ok(FakeState::list_selected(&self.lock().pods, namespace, selector))
    }

    async fn get_volume_snapshot(&self, namespace: &str, name: &str) -> Result<Option<VolumeSnapshot>> {
        Ok(self.snapshot(namespace, name))
    }

    async fn create_volume_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot> {
        let mut state = self.lock();
        let state = &mut *state;
        if !state.snapshot_api {
            return Err(Error::NotFound("VolumeSnapshot API".to_string()));
        }
        state.check_quota("volumesnapshots", &snapshot.metadata, "count/volumesnapshots")?;
        Self::record_write(state);
        create_in(&mut state.snapshots, &mut state.version, "VolumeSnapshot", snapshot)
    }

    async fn delete_volume_snapshot(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let state = &mut *state;
        Self::record_write(state);
        delete_in(&mut state.snapshots, &mut state.version, &key(namespace, name));
        Ok(())
    }

    async fn list_volume_snapshots(&self, namespace: &str, selector: &str) -> Result<Vec<VolumeSnapshot>> {
        let state = self.lock();
        if !state.snapshot_api {
            return Ok(Vec::new());
        }
        Ok(FakeState::list_selected(&state.snapshots, namespace, selector))
    }

    async fn get_volume_snapshot_content(&self, name: &str) -> Result<Option<VolumeSnapshotContent>> {
        Ok(self.lock().snapshot_contents.get(&key("", name)).cloned())
    }

    async fn list_volume_snapshot_classes(&self) -> Result<Vec<VolumeSnapshotClass>> {
        let state = self.lock();
        if !state.snapshot_api {
            return Ok(Vec::new());
        }
        Ok(state.snapshot_classes.values().cloned().collect())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        Ok(self.lock().storage_classes.get(&key("", name)).cloned())
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        Ok(self.lock().storage_classes.values().cloned().collect())
    }

    async fn get_storage_profile(&self, name: &str) -> Result<Option<StorageProfile>> {
        Ok(self.lock().storage_profiles.get(&key("", name)).cloned())
    }

    async fn get_cdi_config(&self) -> Result<Option<CDIConfig>> {
        Ok(self.lock().cdi_config.clone())
    }

    async fn get_volume_clone_source(&self, namespace: &str, name: &str) -> Result<Option<VolumeCloneSource>> {
        Ok(self.lock().clone_sources.get(&key(namespace, name)).cloned())
    }

    async fn list_events(&self, namespace: &str, involved_uid: &str) -> Result<Vec<Event>> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| {
                e.metadata.namespace.as_deref() == Some(namespace)
                    && e.involved_object.uid.as_deref() == Some(involved_uid)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventRecorder for FakeClusterClient {
    async fn record(&self, object: &ObjectReference, event: CloneEvent) {
        let mut state = self.lock();
        let index = state.events.len();
        state.events.push(Event {
            metadata: ObjectMeta {
                name: Some(format!(
                    "{}.{}",
                    object.name.as_deref().unwrap_or_default(),
                    index
                )),
                namespace: object.namespace.clone(),
                ..Default::default()
            },
            involved_object: object.clone(),
            reason: Some(event.reason),
            message: Some(event.message),
            type_: Some(event.type_.as_str().to_string()),
            ..Default::default()
        });
    }
}
