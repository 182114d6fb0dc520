//! 集群对象工具函数
//!
//! 该模块封装了对 PVC、元数据、注解、标签与 finalizer 的常用操作，
//! 各阶段与协调器共用这些函数读取和修改持久化状态。

use std::collections::BTreeMap;

use cdi_common::consts::{
    ANN_EVENT_SOURCE, ANN_EVENT_SOURCE_KIND, LABEL_EXCLUDE_FROM_VELERO_BACKUP, LABEL_OWNED_BY_UID,
};
use cdi_common::quantity::parse_quantity;
use cdi_common::{Error, Result};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

/// 存储资源键
pub const RESOURCE_STORAGE: &str = "storage";

const CLAIM_BOUND: &str = "Bound";
const WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";

/// 卷模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMode {
    Filesystem,
    Block,
}

impl VolumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeMode::Filesystem => "Filesystem",
            VolumeMode::Block => "Block",
        }
    }
}

/// 解析 PVC 的卷模式，未设置时为 Filesystem
pub fn volume_mode(pvc: &PersistentVolumeClaim) -> VolumeMode {
    match pvc.spec.as_ref().and_then(|s| s.volume_mode.as_deref()) {
        Some("Block") => VolumeMode::Block,
        _ => VolumeMode::Filesystem,
    }
}

/// 所有 PVC 的卷模式是否一致
pub fn same_volume_mode(first: &PersistentVolumeClaim, others: &[&PersistentVolumeClaim]) -> bool {
    let mode = volume_mode(first);
    others.iter().all(|pvc| volume_mode(pvc) == mode)
}

/// `namespace/name` 形式的对象名
pub fn namespaced_name<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.meta().namespace.as_deref().unwrap_or_default(),
        obj.meta().name.as_deref().unwrap_or_default()
    )
}

pub fn uid_of<K: Resource>(obj: &K) -> Result<String> {
    obj.meta()
        .uid
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::precondition(format!("{} has no uid", namespaced_name(obj))))
}

/// StorageClass 名称，`None` 表示未设置
pub fn storage_class_name(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec.as_ref().and_then(|s| s.storage_class_name.as_deref())
}

/// 请求的存储大小
pub fn storage_request(pvc: &PersistentVolumeClaim) -> Option<&Quantity> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(RESOURCE_STORAGE))
}

pub fn storage_request_bytes(pvc: &PersistentVolumeClaim) -> Result<Option<i64>> {
    storage_request(pvc).map(parse_quantity).transpose()
}

/// 设置请求的存储大小
pub fn set_storage_request(pvc: &mut PersistentVolumeClaim, size: Quantity) {
    let spec = pvc.spec.get_or_insert_with(Default::default);
    let resources = spec.resources.get_or_insert_with(Default::default);
    resources
        .requests
        .get_or_insert_with(BTreeMap::new)
        .insert(RESOURCE_STORAGE.to_string(), size);
}

/// 实际容量
pub fn storage_capacity(pvc: &PersistentVolumeClaim) -> Option<&Quantity> {
    pvc.status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get(RESOURCE_STORAGE))
}

pub fn storage_capacity_bytes(pvc: &PersistentVolumeClaim) -> Result<Option<i64>> {
    storage_capacity(pvc).map(parse_quantity).transpose()
}

/// PVC 状态为 Bound
pub fn is_bound(pvc: &PersistentVolumeClaim) -> bool {
    pvc.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(CLAIM_BOUND)
}

/// `spec.volumeName`，空字符串视为未设置
pub fn volume_name(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .filter(|n| !n.is_empty())
}

pub fn is_wffc(sc: &StorageClass) -> bool {
    sc.volume_binding_mode.as_deref() == Some(WAIT_FOR_FIRST_CONSUMER)
}

pub fn allows_expansion(sc: &StorageClass) -> bool {
    sc.allow_volume_expansion.unwrap_or(false)
}

pub fn is_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn annotation<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

pub fn has_annotation<K: Resource>(obj: &K, key: &str) -> bool {
    annotation(obj, key).is_some()
}

/// 设置注解，返回是否发生变化
pub fn set_annotation(meta: &mut ObjectMeta, key: &str, value: impl Into<String>) -> bool {
    let value = value.into();
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    if annotations.get(key) == Some(&value) {
        return false;
    }
    annotations.insert(key.to_string(), value);
    true
}

/// 删除注解，返回是否发生变化
pub fn remove_annotation(meta: &mut ObjectMeta, key: &str) -> bool {
    meta.annotations
        .as_mut()
        .map(|a| a.remove(key).is_some())
        .unwrap_or(false)
}

/// 设置标签，返回是否发生变化
pub fn set_label(meta: &mut ObjectMeta, key: &str, value: impl Into<String>) -> bool {
    let value = value.into();
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    if labels.get(key) == Some(&value) {
        return false;
    }
    labels.insert(key.to_string(), value);
    true
}

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == finalizer))
        .unwrap_or(false)
}

/// 添加 finalizer，返回是否发生变化
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == finalizer) {
        return false;
    }
    finalizers.push(finalizer.to_string());
    true
}

/// 移除 finalizer，返回是否发生变化
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    match meta.finalizers.as_mut() {
        Some(finalizers) => {
            let before = finalizers.len();
            finalizers.retain(|f| f != finalizer);
            before != finalizers.len()
        }
        None => false,
    }
}

/// 为中间资源打上归属标签
pub fn add_ownership_label<K: Resource>(meta: &mut ObjectMeta, owner: &K) -> Result<()> {
    set_label(meta, LABEL_OWNED_BY_UID, uid_of(owner)?);
    Ok(())
}

pub fn add_velero_exclusion(meta: &mut ObjectMeta) {
    set_label(meta, LABEL_EXCLUDE_FROM_VELERO_BACKUP, "true");
}

/// 事件来源关联，使中间 PVC 上的事件可以复制到目标 PVC
pub fn add_event_source(meta: &mut ObjectMeta, owner: &PersistentVolumeClaim) {
    set_annotation(meta, ANN_EVENT_SOURCE_KIND, "PersistentVolumeClaim");
    set_annotation(meta, ANN_EVENT_SOURCE, namespaced_name(owner));
}

/// 以 `owner` 为控制者的 OwnerReference
pub fn controller_owner_ref<K: Resource<DynamicType = ()>>(owner: &K) -> Result<OwnerReference> {
    owner
        .controller_owner_ref(&())
        .ok_or_else(|| Error::precondition(format!("{} has no uid", namespaced_name(owner))))
}

/// 指向对象的 ObjectReference，用于事件
pub fn object_reference<K: Resource<DynamicType = ()>>(obj: &K) -> ObjectReference {
    obj.object_ref(&())
}

/// ownerReferences 中是否有指定 kind 的控制者
pub fn controlled_by_kind<K: Resource>(obj: &K, kind: &str) -> bool {
    obj.meta()
        .owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .any(|r| r.controller.unwrap_or(false) && r.kind == kind)
        })
        .unwrap_or(false)
}

/// 由标签键值构造等值选择器
pub fn label_selector(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// 判断对象是否满足 `k=v,k2=v2` 形式的等值选择器，空选择器匹配全部
pub fn matches_selector<K: Resource>(obj: &K, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, ResourceRequirements,
    };

    fn claim(volume_mode: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("target".into()),
                namespace: Some("ns".into()),
                uid: Some("T".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                volume_mode: volume_mode.map(String::from),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        RESOURCE_STORAGE.to_string(),
                        Quantity("10Gi".into()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_volume_mode_defaults_to_filesystem() {
        assert_eq!(volume_mode(&claim(None)), VolumeMode::Filesystem);
        assert_eq!(volume_mode(&claim(Some("Block"))), VolumeMode::Block);
        assert!(same_volume_mode(&claim(None), &[&claim(Some("Filesystem"))]));
        assert!(!same_volume_mode(&claim(None), &[&claim(Some("Block"))]));
    }

    #[test]
    fn test_storage_request_and_capacity() {
        let mut pvc = claim(None);
        assert_eq!(storage_request_bytes(&pvc).unwrap(), Some(10 << 30));
        assert_eq!(storage_capacity_bytes(&pvc).unwrap(), None);

        set_storage_request(&mut pvc, Quantity("15Gi".into()));
        assert_eq!(storage_request_bytes(&pvc).unwrap(), Some(15 << 30));

        pvc.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".into()),
            capacity: Some(BTreeMap::from([(
                RESOURCE_STORAGE.to_string(),
                Quantity("10Gi".into()),
            )])),
            ..Default::default()
        });
        assert!(is_bound(&pvc));
        assert_eq!(storage_capacity_bytes(&pvc).unwrap(), Some(10 << 30));
    }

    #[test]
    fn test_annotation_and_finalizer_helpers_report_changes() {
        let mut pvc = claim(None);
        assert!(set_annotation(&mut pvc.metadata, "a", "1"));
        assert!(!set_annotation(&mut pvc.metadata, "a", "1"));
        assert_eq!(annotation(&pvc, "a"), Some("1"));
        assert!(remove_annotation(&mut pvc.metadata, "a"));
        assert!(!remove_annotation(&mut pvc.metadata, "a"));

        assert!(add_finalizer(&mut pvc.metadata, "f"));
        assert!(!add_finalizer(&mut pvc.metadata, "f"));
        assert!(has_finalizer(&pvc, "f"));
        assert!(remove_finalizer(&mut pvc.metadata, "f"));
        assert!(!has_finalizer(&pvc, "f"));
    }

    #[test]
    fn test_matches_selector() {
        let mut pvc = claim(None);
        add_ownership_label(&mut pvc.metadata, &claim(None)).unwrap();
        assert!(matches_selector(&pvc, &label_selector(LABEL_OWNED_BY_UID, "T")));
        assert!(!matches_selector(&pvc, &label_selector(LABEL_OWNED_BY_UID, "X")));
        assert!(matches_selector(&pvc, ""));
    }

    #[test]
    fn test_controller_owner_ref_requires_uid() {
        let pvc = claim(None);
        let owner = controller_owner_ref(&pvc).unwrap();
        assert_eq!(owner.uid, "T");
        assert_eq!(owner.kind, "PersistentVolumeClaim");
        assert_eq!(owner.controller, Some(true));

        let mut no_uid = claim(None);
        no_uid.metadata.uid = None;
        assert!(controller_owner_ref(&no_uid).is_err());
    }
}
