//! 集群对象客户端
//!
//! 克隆流程通过 [`ClusterClient`] 读写集群对象。读取不存在的对象返回 `Ok(None)`，
//! 删除不存在的对象视为成功，替换操作以对象当前的 resourceVersion 作为前置条件。

mod kube_client;

pub use kube_client::KubeClusterClient;

use async_trait::async_trait;
use cdi_common::{
    CDIConfig, Result, StorageProfile, VolumeCloneSource, VolumeSnapshot, VolumeSnapshotClass,
    VolumeSnapshotContent,
};
use k8s_openapi::api::core::v1::{Event, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;

/// 克隆流程使用的集群读写接口
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>>;
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;
    /// 以 resourceVersion 为前置条件整体替换
    async fn replace_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()>;
    async fn list_pvcs(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>>;

    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>>;
    /// 以 resourceVersion 为前置条件整体替换
    async fn replace_pv(&self, pv: &PersistentVolume) -> Result<PersistentVolume>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    async fn get_volume_snapshot(&self, namespace: &str, name: &str) -> Result<Option<VolumeSnapshot>>;
    async fn create_volume_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot>;
    async fn delete_volume_snapshot(&self, namespace: &str, name: &str) -> Result<()>;
    async fn list_volume_snapshots(&self, namespace: &str, selector: &str) -> Result<Vec<VolumeSnapshot>>;
    async fn get_volume_snapshot_content(&self, name: &str) -> Result<Option<VolumeSnapshotContent>>;
    /// 快照 API 未安装时返回空列表
    async fn list_volume_snapshot_classes(&self) -> Result<Vec<VolumeSnapshotClass>>;

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>>;
    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>>;
    async fn get_storage_profile(&self, name: &str) -> Result<Option<StorageProfile>>;
    /// 读取 CDIConfig 单例
    async fn get_cdi_config(&self) -> Result<Option<CDIConfig>>;
    async fn get_volume_clone_source(&self, namespace: &str, name: &str) -> Result<Option<VolumeCloneSource>>;

    /// 列出涉及指定 UID 对象的事件
    async fn list_events(&self, namespace: &str, involved_uid: &str) -> Result<Vec<Event>>;
}
