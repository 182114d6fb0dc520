//! 克隆阶段
//!
//! 每个阶段是一个幂等的协调步骤：观察集群中的对象，必要时创建或修改对象，
//! 然后返回“完成”或“稍后重试”。阶段列表由规划器生成，由 [`run_phases`]
//! 顺序执行，前一个阶段完成之前不会进入下一个阶段。

mod csi_clone;
mod host_clone;
mod prep_claim;
mod rebind;
mod snapshot;
mod snapshot_clone;

pub use csi_clone::CsiClonePhase;
pub use host_clone::HostClonePhase;
pub use prep_claim::{PrepClaimPhase, PrepPodConfig};
pub use rebind::RebindPhase;
pub use snapshot::SnapshotPhase;
pub use snapshot_clone::SnapshotClonePhase;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdi_common::consts::{ANN_POPULATOR_KIND, VOLUME_CLONE_SOURCE_KIND};
use cdi_common::{Error, Result, VolumeSnapshot};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, warn};

use crate::capability::CapabilityResolver;
use crate::client::ClusterClient;
use crate::events::{copy_events, record_quota_exceeded, EventRecorder};
use crate::utils::{
    add_event_source, add_ownership_label, add_velero_exclusion, controller_owner_ref, namespaced_name,
    set_annotation,
};

/// 源对象尚未就绪时的重试间隔
pub(crate) const SOURCE_READY_REQUEUE: Duration = Duration::from_secs(2);

/// 阶段请求的重新排队间隔，零表示使用默认间隔
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requeue {
    pub after: Duration,
}

impl Requeue {
    pub fn after(after: Duration) -> Self {
        Self { after }
    }

    pub fn is_default(&self) -> bool {
        self.after.is_zero()
    }
}

/// 阶段上报的进度
///
/// `progress` 为空表示本次不更新进度注解。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseProgress {
    pub progress: String,
    pub annotations: BTreeMap<String, String>,
}

/// 克隆阶段
#[async_trait]
pub trait Phase: Send + Sync {
    /// 写入 `clonePhase` 注解的稳定名称
    fn name(&self) -> &'static str;

    /// `Ok(None)` 表示完成，`Ok(Some(_))` 表示稍后重试
    async fn reconcile(&self) -> Result<Option<Requeue>>;

    /// 可选的进度上报
    async fn progress(&self) -> Result<Option<PhaseProgress>> {
        Ok(None)
    }
}

/// 一次阶段执行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseRun {
    /// 停在 `phase`，按 `requeue` 重新排队
    InProgress {
        phase: &'static str,
        requeue: Requeue,
        statuses: Vec<PhaseProgress>,
    },
    /// 全部阶段已完成
    Completed { statuses: Vec<PhaseProgress> },
}

/// 阶段执行失败
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PhaseError {
    pub phase: &'static str,
    #[source]
    pub error: Error,
}

/// 顺序执行阶段列表
///
/// `status_only` 为真时只采集进度，不执行协调。
pub async fn run_phases(phases: &[Box<dyn Phase>], status_only: bool) -> std::result::Result<PhaseRun, PhaseError> {
    let mut statuses = Vec::new();
    for phase in phases {
        let name = phase.name();
        let requeue = if status_only {
            None
        } else {
            phase
                .reconcile()
                .await
                .map_err(|error| PhaseError { phase: name, error })?
        };

        if let Some(progress) = phase
            .progress()
            .await
            .map_err(|error| PhaseError { phase: name, error })?
        {
            statuses.push(progress);
        }

        if let Some(requeue) = requeue {
            debug!("阶段 {} 尚未完成", name);
            return Ok(PhaseRun::InProgress {
                phase: name,
                requeue,
                statuses,
            });
        }
    }
    Ok(PhaseRun::Completed { statuses })
}

/// 阶段共享的集群访问
#[derive(Clone)]
pub struct PhaseContext {
    pub client: Arc<dyn ClusterClient>,
    pub recorder: Arc<dyn EventRecorder>,
}

impl PhaseContext {
    pub fn new(client: Arc<dyn ClusterClient>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self { client, recorder }
    }

    pub fn resolver(&self) -> CapabilityResolver {
        CapabilityResolver::new(self.client.clone())
    }

    /// 创建中间 PVC，配额拒绝时在目标 PVC 上记录告警
    pub(crate) async fn create_claim(
        &self,
        owner: &PersistentVolumeClaim,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        match self.client.create_pvc(claim).await {
            Ok(created) => {
                debug!("已创建中间 PVC {}", namespaced_name(&created));
                Ok(created)
            }
            Err(e) => {
                record_quota_exceeded(self.recorder.as_ref(), owner, &e).await;
                Err(e)
            }
        }
    }

    /// 创建 PrepPod 等工作负载，配额拒绝时在目标 PVC 上记录告警
    pub(crate) async fn create_pod(&self, owner: &PersistentVolumeClaim, pod: &Pod) -> Result<Pod> {
        let result = self.client.create_pod(pod).await;
        if let Err(e) = &result {
            record_quota_exceeded(self.recorder.as_ref(), owner, e).await;
        }
        result
    }

    /// 创建临时快照，配额拒绝时在目标 PVC 上记录告警
    pub(crate) async fn create_snapshot(
        &self,
        owner: &PersistentVolumeClaim,
        snapshot: &VolumeSnapshot,
    ) -> Result<VolumeSnapshot> {
        let result = self.client.create_volume_snapshot(snapshot).await;
        if let Err(e) = &result {
            record_quota_exceeded(self.recorder.as_ref(), owner, e).await;
        }
        result
    }

    /// 把中间 PVC 上的事件复制到目标 PVC，失败只记录日志
    pub(crate) async fn mirror_events(&self, from: &PersistentVolumeClaim, owner: &PersistentVolumeClaim) {
        if let Err(e) = copy_events(self.client.as_ref(), self.recorder.as_ref(), from, owner).await {
            warn!("复制 {} 的事件失败: {}", namespaced_name(from), e);
        }
    }
}

/// 由期望的 PVC 构造一个待创建的中间 PVC
///
/// 清除服务端字段，打上归属标签、控制者引用、事件来源与备份排除标记。
pub(crate) fn intermediate_claim(
    desired: &PersistentVolumeClaim,
    namespace: &str,
    owner: &PersistentVolumeClaim,
) -> Result<PersistentVolumeClaim> {
    let mut claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: desired.metadata.name.clone(),
            namespace: Some(namespace.to_string()),
            labels: desired.metadata.labels.clone(),
            annotations: desired.metadata.annotations.clone(),
            ..Default::default()
        },
        spec: desired.spec.clone(),
        status: None,
    };
    claim.metadata.owner_references = Some(vec![controller_owner_ref(owner)?]);
    add_ownership_label(&mut claim.metadata, owner)?;
    set_annotation(&mut claim.metadata, ANN_POPULATOR_KIND, VOLUME_CLONE_SOURCE_KIND);
    add_event_source(&mut claim.metadata, owner);
    add_velero_exclusion(&mut claim.metadata);
    Ok(claim)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! 阶段测试共用的对象构造

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::PhaseContext;
    use crate::testing::FakeClusterClient;
    use crate::utils::RESOURCE_STORAGE;

    pub const NS: &str = "ns";

    pub fn claim(name: &str, size: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(NS.into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some("sc".into()),
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(RESOURCE_STORAGE.to_string(), Quantity(size.into()))])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// 集群中有 StorageClass `sc`、已绑定的源 PVC `source` 与目标 PVC `target`
    pub fn cluster(wffc: bool) -> (Arc<FakeClusterClient>, PhaseContext, PersistentVolumeClaim) {
        let fake = Arc::new(FakeClusterClient::new());
        fake.add_storage_class("sc", "p", wffc, true);
        fake.add_pvc(claim("source", "10Gi"));
        fake.provision(NS, "source", "10Gi");
        let target = fake.add_pvc(claim("target", "10Gi"));
        let ctx = PhaseContext::new(fake.clone(), fake.clone());
        (fake, ctx, target)
    }

    /// 规划器生成的期望 PVC
    pub fn desired(target: &PersistentVolumeClaim, size: &str) -> PersistentVolumeClaim {
        let uid = target.metadata.uid.clone().unwrap_or_default();
        let mut desired = claim(&cdi_common::consts::prime_claim_name(&uid), size);
        desired.metadata.labels = target.metadata.labels.clone();
        desired
    }
}
