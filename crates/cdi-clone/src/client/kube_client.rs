//! 基于 kube-rs 的集群客户端实现

use std::fmt::Debug;

use async_trait::async_trait;
use cdi_common::consts::CDI_CONFIG_NAME;
use cdi_common::{
    CDIConfig, Error, Result, StorageProfile, VolumeCloneSource, VolumeSnapshot,
    VolumeSnapshotClass, VolumeSnapshotContent,
};
use k8s_openapi::api::core::v1::{Event, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::ClusterClient;

/// 直接访问 API server 的客户端
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 底层 kube 客户端
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }
}

fn describe<K: Resource<DynamicType = ()>>(name: &str) -> String {
    format!("{} {}", K::kind(&()), name)
}

async fn fetch<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    api.get_opt(name)
        .await
        .map_err(|e| Error::from_kube(e, describe::<K>(name)))
}

async fn create<K>(api: &Api<K>, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj.name_any();
    debug!("创建 {}", describe::<K>(&name));
    api.create(&PostParams::default(), obj)
        .await
        .map_err(|e| Error::from_kube(e, describe::<K>(&name)))
}

async fn replace<K>(api: &Api<K>, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj.name_any();
    api.replace(&name, &PostParams::default(), obj)
        .await
        .map_err(|e| Error::from_kube(e, describe::<K>(&name)))
}

async fn delete<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    debug!("删除 {}", describe::<K>(name));
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) => match Error::from_kube(e, describe::<K>(name)) {
            Error::NotFound(_) => Ok(()),
            other => Err(other),
        },
    }
}

async fn list<K>(api: &Api<K>, selector: &str) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let params = if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    };
    api.list(&params)
        .await
        .map(|l| l.items)
        .map_err(|e| Error::from_kube(e, describe::<K>(selector)))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        fetch(&self.namespaced(namespace), name).await
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let ns = pvc.namespace().unwrap_or_default();
        create(&self.namespaced(&ns), pvc).await
    }

    async fn replace_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let ns = pvc.namespace().unwrap_or_default();
        replace(&self.namespaced(&ns), pvc).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        delete::<PersistentVolumeClaim>(&self.namespaced(namespace), name).await
    }

    async fn list_pvcs(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        list(&self.namespaced(namespace), selector).await
    }

    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>> {
        fetch(&self.cluster(), name).await
    }

    async fn replace_pv(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        replace(&self.cluster(), pv).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        fetch(&self.namespaced(namespace), name).await
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let ns = pod.namespace().unwrap_or_default();
        create(&self.namespaced(&ns), pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        delete::<Pod>(&self.namespaced(namespace), name).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        list(&self.namespaced(namespace), selector).await
    }

    async fn get_volume_snapshot(&self, namespace: &str, name: &str) -> Result<Option<VolumeSnapshot>> {
        fetch(&self.namespaced(namespace), name).await
    }

    async fn create_volume_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot> {
        let ns = snapshot.namespace().unwrap_or_default();
        create(&self.namespaced(&ns), snapshot).await
    }

    async fn delete_volume_snapshot(&self, namespace: &str, name: &str) -> Result<()> {
        delete::<VolumeSnapshot>(&self.namespaced(namespace), name).await
    }

    async fn list_volume_snapshots(&self, namespace: &str, selector: &str) -> Result<Vec<VolumeSnapshot>> {
        match list(&self.namespaced(namespace), selector).await {
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn get_volume_snapshot_content(&self, name: &str) -> Result<Option<VolumeSnapshotContent>> {
        fetch(&self.cluster(), name).await
    }

    async fn list_volume_snapshot_classes(&self) -> Result<Vec<VolumeSnapshotClass>> {
        match list(&self.cluster(), "").await {
            Err(Error::NotFound(_)) => {
                debug!("快照 API 未安装");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        fetch(&self.cluster(), name).await
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        list(&self.cluster(), "").await
    }

    async fn get_storage_profile(&self, name: &str) -> Result<Option<StorageProfile>> {
        fetch(&self.cluster(), name).await
    }

    async fn get_cdi_config(&self) -> Result<Option<CDIConfig>> {
        fetch(&self.cluster(), CDI_CONFIG_NAME).await
    }

    async fn get_volume_clone_source(&self, namespace: &str, name: &str) -> Result<Option<VolumeCloneSource>> {
        fetch(&self.namespaced(namespace), name).await
    }

    async fn list_events(&self, namespace: &str, involved_uid: &str) -> Result<Vec<Event>> {
        let api: Api<Event> = self.namespaced(namespace);
        let params = ListParams::default().fields(&format!("involvedObject.uid={involved_uid}"));
        api.list(&params)
            .await
            .map(|l| l.items)
            .map_err(|e| Error::from_kube(e, format!("events for {involved_uid}")))
    }
}
