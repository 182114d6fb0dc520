//! 克隆源就绪检查
//!
//! 源 PVC 必须已绑定、数据已填充，并且没有以读写方式挂载它的运行中 Pod。

use cdi_common::consts::{ANN_POD_PHASE, ANN_POPULATED_FOR, ANN_PRE_POPULATED, PHASE_SUCCEEDED, REASON_CLONE_SOURCE_IN_USE};
use cdi_common::Result;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use tracing::debug;

use crate::client::ClusterClient;
use crate::events::{CloneEvent, EventRecorder};
use crate::utils::{annotation, controlled_by_kind, has_annotation, is_bound, object_reference};

const POD_SUCCEEDED: &str = "Succeeded";
const POD_FAILED: &str = "Failed";

/// 正在使用 `claim_name` 的 Pod，忽略已结束的 Pod
///
/// `allow_read_only` 为真时，只读挂载不算占用。
pub async fn pods_using_claim(
    client: &dyn ClusterClient,
    namespace: &str,
    claim_name: &str,
    allow_read_only: bool,
) -> Result<Vec<Pod>> {
    let pods = client.list_pods(namespace, "").await?;
    Ok(pods
        .into_iter()
        .filter(|pod| {
            let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
            !matches!(phase, Some(POD_SUCCEEDED) | Some(POD_FAILED))
        })
        .filter(|pod| pod_uses_claim(pod, claim_name, allow_read_only))
        .collect())
}

fn pod_uses_claim(pod: &Pod, claim_name: &str, allow_read_only: bool) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return false;
    };
    spec.volumes.iter().flatten().any(|volume| {
        let Some(source) = volume.persistent_volume_claim.as_ref() else {
            return false;
        };
        if source.claim_name != claim_name {
            return false;
        }
        if !allow_read_only {
            return true;
        }
        if source.read_only.unwrap_or(false) {
            return false;
        }
        // 所有容器都只读挂载时视为只读使用
        let mounts: Vec<bool> = spec
            .containers
            .iter()
            .flat_map(|c| c.volume_mounts.iter().flatten())
            .filter(|m| m.name == volume.name)
            .map(|m| m.read_only.unwrap_or(false))
            .collect();
        mounts.is_empty() || mounts.iter().any(|ro| !ro)
    })
}

/// PVC 的数据是否已填充
///
/// 由 DataVolume 控制的 PVC 需要导入完成的标记，其他 PVC 视为已填充。
pub fn is_populated(claim: &PersistentVolumeClaim) -> bool {
    if !controlled_by_kind(claim, "DataVolume") {
        return true;
    }
    annotation(claim, ANN_POD_PHASE) == Some(PHASE_SUCCEEDED)
        || has_annotation(claim, ANN_POPULATED_FOR)
        || has_annotation(claim, ANN_PRE_POPULATED)
}

/// 源 PVC 是否可以开始克隆
///
/// 被占用时在 `target` 上为每个占用的 Pod 记录 CloneSourceInUse 告警。
pub async fn is_source_claim_ready(
    client: &dyn ClusterClient,
    recorder: &dyn EventRecorder,
    target: &PersistentVolumeClaim,
    namespace: &str,
    name: &str,
) -> Result<bool> {
    let Some(claim) = client.get_pvc(namespace, name).await? else {
        debug!("源 PVC {}/{} 不存在", namespace, name);
        return Ok(false);
    };

    if !is_bound(&claim) {
        debug!("源 PVC {}/{} 尚未绑定", namespace, name);
        return Ok(false);
    }

    let pods = pods_using_claim(client, namespace, name, true).await?;
    if !pods.is_empty() {
        let reference = object_reference(target);
        for pod in &pods {
            let message = format!(
                "pod {}/{} using PersistentVolumeClaim {}",
                pod.metadata.namespace.as_deref().unwrap_or_default(),
                pod.metadata.name.as_deref().unwrap_or_default(),
                name
            );
            recorder
                .record(&reference, CloneEvent::warning(REASON_CLONE_SOURCE_IN_USE, message))
                .await;
        }
        return Ok(false);
    }

    Ok(is_populated(&claim))
}
