//! 事件映射模块
//!
//! 控制器除目标 PVC 本身外还监听若干相关对象，该模块负责把这些对象的变化
//! 映射回需要重新协调的目标 PVC：
//!
//! - 带 `cdi.kubevirt.io/OwnedByUID` 标签的中间 PVC、PrepPod 与临时快照，
//!   通过标签中的 UID 在控制器缓存中反查目标 PVC；
//! - VolumeCloneSource，通过 `<group>/<kind>/<namespace>/<name>` 索引键
//!   找到所有引用它的目标 PVC。

use cdi_common::consts::{API_GROUP, LABEL_OWNED_BY_UID, VOLUME_CLONE_SOURCE_KIND};
use cdi_common::VolumeCloneSource;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::reconcile::clone_source_ref;

/// dataSourceRef 索引键
pub fn index_key(group: &str, kind: &str, namespace: &str, name: &str) -> String {
    format!("{group}/{kind}/{namespace}/{name}")
}

/// 目标 PVC 引用的克隆源的索引键，跨命名空间引用以引用中的命名空间为准
pub fn claim_index_key(pvc: &PersistentVolumeClaim) -> Option<String> {
    let source = clone_source_ref(pvc)?;
    let namespace = source
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .or(pvc.metadata.namespace.as_deref())?;
    Some(index_key(API_GROUP, VOLUME_CLONE_SOURCE_KIND, namespace, &source.name))
}

/// 由中间对象的归属标签找到目标 PVC
pub fn targets_for_owned<K: Resource>(obj: &K, store: &Store<PersistentVolumeClaim>) -> Vec<ObjectRef<PersistentVolumeClaim>> {
    let Some(owner_uid) = obj.labels().get(LABEL_OWNED_BY_UID) else {
        return Vec::new();
    };
    let namespace = obj.namespace();
    let targets: Vec<_> = store
        .state()
        .iter()
        .filter(|pvc| pvc.metadata.uid.as_ref() == Some(owner_uid) && pvc.namespace() == namespace)
        .map(|pvc| ObjectRef::from_obj(pvc.as_ref()))
        .collect();
    if targets.is_empty() {
        debug!("缓存中没有 UID 为 {} 的目标 PVC", owner_uid);
    }
    targets
}

/// 找到引用该 VolumeCloneSource 的全部目标 PVC
pub fn targets_for_clone_source(
    source: &VolumeCloneSource,
    store: &Store<PersistentVolumeClaim>,
) -> Vec<ObjectRef<PersistentVolumeClaim>> {
    let key = index_key(
        API_GROUP,
        VOLUME_CLONE_SOURCE_KIND,
        &source.namespace().unwrap_or_default(),
        &source.name_any(),
    );
    store
        .state()
        .iter()
        .filter(|pvc| claim_index_key(pvc).as_deref() == Some(key.as_str()))
        .map(|pvc| ObjectRef::from_obj(pvc.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdi_common::VolumeCloneSourceSpec;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, Pod, TypedLocalObjectReference, TypedObjectReference};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher;
    use std::collections::BTreeMap;

    fn target(name: &str, uid: &str, source: &str, source_ns: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                uid: Some(uid.into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                data_source_ref: Some(TypedObjectReference {
                    api_group: Some(API_GROUP.into()),
                    kind: VOLUME_CLONE_SOURCE_KIND.into(),
                    name: source.into(),
                    namespace: source_ns.map(String::from),
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn store(claims: Vec<PersistentVolumeClaim>) -> Store<PersistentVolumeClaim> {
        let mut writer = Writer::<PersistentVolumeClaim>::default();
        for pvc in claims {
            writer.apply_watcher_event(&watcher::Event::Applied(pvc));
        }
        writer.as_reader()
    }

    fn owned_pod(namespace: &str, owner_uid: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("prep".into()),
                namespace: Some(namespace.into()),
                labels: Some(BTreeMap::from([(LABEL_OWNED_BY_UID.to_string(), owner_uid.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_owned_objects_map_to_target() {
        let store = store(vec![target("a", "uid-a", "vcs", None), target("b", "uid-b", "vcs", None)]);

        let refs = targets_for_owned(&owned_pod("ns", "uid-b"), &store);
        assert_eq!(refs, vec![ObjectRef::new("b").within("ns")]);

        assert!(targets_for_owned(&owned_pod("other", "uid-b"), &store).is_empty());
        assert!(targets_for_owned(&Pod::default(), &store).is_empty());
    }

    #[test]
    fn test_clone_source_maps_to_referencing_claims() {
        let store = store(vec![
            target("a", "uid-a", "vcs", None),
            target("b", "uid-b", "other", None),
            target("c", "uid-c", "vcs", Some("elsewhere")),
        ]);
        let mut source = VolumeCloneSource::new(
            "vcs",
            VolumeCloneSourceSpec {
                source: TypedLocalObjectReference {
                    api_group: None,
                    kind: "PersistentVolumeClaim".into(),
                    name: "source".into(),
                },
                content_type: None,
                preallocation: None,
                priority_class_name: None,
            },
        );
        source.metadata.namespace = Some("ns".into());

        let refs = targets_for_clone_source(&source, &store);
        assert_eq!(refs, vec![ObjectRef::new("a").within("ns")]);
    }

    #[test]
    fn test_claim_index_key() {
        assert_eq!(
            claim_index_key(&target("a", "u", "vcs", None)).as_deref(),
            Some("cdi.kubevirt.io/VolumeCloneSource/ns/vcs")
        );
        assert_eq!(
            claim_index_key(&target("a", "u", "vcs", Some("src"))).as_deref(),
            Some("cdi.kubevirt.io/VolumeCloneSource/src/vcs")
        );
        assert_eq!(claim_index_key(&PersistentVolumeClaim::default()), None);
    }
}
