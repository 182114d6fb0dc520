//! 主机辅助克隆阶段
//!
//! 创建带克隆请求注解的中间 PVC，由上传/克隆工作 Pod 复制数据。
//! 完成状态与进度都从中间 PVC 的注解和工作 Pod 的指标读取。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdi_common::consts::{
    ANN_CLONE_REQUEST, ANN_CLONE_SOURCE_POD, ANN_IMMEDIATE_BINDING, ANN_OWNER_UID, ANN_POD_PHASE,
    ANN_POD_RESTARTS, ANN_PREALLOCATION_APPLIED, ANN_PREALLOCATION_REQUESTED, ANN_PRIORITY_CLASS_NAME,
    PHASE_SUCCEEDED, PROGRESS_DONE,
};
use cdi_common::Result;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tracing::{debug, info, warn};

use super::{intermediate_claim, Phase, PhaseContext, PhaseProgress, Requeue};
use crate::progress::{format_progress, metrics_url, parse_progress, ProgressSource, CLONE_PROGRESS_METRIC};
use crate::utils::{annotation, namespaced_name, set_annotation, uid_of};

const POD_RUNNING: &str = "Running";
const HOST_CLONE_REQUEUE: Duration = Duration::from_secs(3);

/// 主机辅助克隆
pub struct HostClonePhase {
    pub ctx: PhaseContext,
    pub owner: PersistentVolumeClaim,
    pub namespace: String,
    pub source_name: String,
    pub desired_claim: PersistentVolumeClaim,
    pub immediate_bind: bool,
    pub preallocation: bool,
    pub priority_class_name: Option<String>,
    pub progress_source: Arc<dyn ProgressSource>,
}

impl HostClonePhase {
    fn claim_name(&self) -> &str {
        self.desired_claim.metadata.name.as_deref().unwrap_or_default()
    }

    fn build_claim(&self) -> Result<PersistentVolumeClaim> {
        let mut claim = intermediate_claim(&self.desired_claim, &self.namespace, &self.owner)?;
        let meta = &mut claim.metadata;
        set_annotation(meta, ANN_PREALLOCATION_REQUESTED, self.preallocation.to_string());
        set_annotation(meta, ANN_OWNER_UID, uid_of(&self.owner)?);
        set_annotation(meta, ANN_POD_RESTARTS, "0");
        set_annotation(
            meta,
            ANN_CLONE_REQUEST,
            format!("{}/{}", self.namespace, self.source_name),
        );
        if self.immediate_bind {
            set_annotation(meta, ANN_IMMEDIATE_BINDING, "");
        }
        if let Some(priority) = self.priority_class_name.as_deref().filter(|p| !p.is_empty()) {
            set_annotation(meta, ANN_PRIORITY_CLASS_NAME, priority);
        }
        Ok(claim)
    }

    fn host_clone_complete(&self, claim: &PersistentVolumeClaim) -> bool {
        if annotation(claim, ANN_POD_PHASE) != Some(PHASE_SUCCEEDED) {
            return false;
        }
        !self.preallocation || annotation(claim, ANN_PREALLOCATION_APPLIED) == Some("true")
    }

    /// 从工作 Pod 的指标读取进度，读不到时返回空串
    async fn scrape_progress(&self, claim: &PersistentVolumeClaim) -> Result<String> {
        let Some(pod_name) = annotation(claim, ANN_CLONE_SOURCE_POD).filter(|n| !n.is_empty()) else {
            return Ok(String::new());
        };
        let Some(pod) = self.ctx.client.get_pod(&self.namespace, pod_name).await? else {
            return Ok(String::new());
        };
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        if phase != Some(POD_RUNNING) {
            return Ok(String::new());
        }
        let Some(url) = metrics_url(&pod) else {
            return Ok(String::new());
        };

        let body = match self.progress_source.fetch_metrics(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("读取 {} 的克隆进度失败: {}", pod_name, e);
                return Ok(String::new());
            }
        };
        let owner_uid = uid_of(&self.owner)?;
        match parse_progress(&body, CLONE_PROGRESS_METRIC, &owner_uid) {
            // 工作 Pod 退出前可能短暂报告 100%，以 Succeeded 为准
            Some(value) if value < 100.0 => Ok(format_progress(value)),
            _ => Ok(String::new()),
        }
    }
}

#[async_trait]
impl Phase for HostClonePhase {
    fn name(&self) -> &'static str {
        "HostClone"
    }

    async fn reconcile(&self) -> Result<Option<Requeue>> {
        let claim = match self.ctx.client.get_pvc(&self.namespace, self.claim_name()).await? {
            Some(claim) => claim,
            None => {
                let claim = self.build_claim()?;
                let created = self.ctx.create_claim(&self.owner, &claim).await?;
                info!(
                    "为 {} 创建主机辅助克隆 PVC {}",
                    namespaced_name(&self.owner),
                    namespaced_name(&created)
                );
                created
            }
        };

        self.ctx.mirror_events(&claim, &self.owner).await;

        if self.host_clone_complete(&claim) {
            return Ok(None);
        }
        debug!("主机辅助克隆 {} 尚未完成", namespaced_name(&claim));
        Ok(Some(Requeue::after(HOST_CLONE_REQUEUE)))
    }

    async fn progress(&self) -> Result<Option<PhaseProgress>> {
        let Some(claim) = self.ctx.client.get_pvc(&self.namespace, self.claim_name()).await? else {
            return Ok(Some(PhaseProgress::default()));
        };

        let progress = if annotation(&claim, ANN_POD_PHASE) == Some(PHASE_SUCCEEDED) {
            PROGRESS_DONE.to_string()
        } else {
            self.scrape_progress(&claim).await?
        };

        Ok(Some(PhaseProgress {
            progress,
            annotations: claim.metadata.annotations.clone().unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::test_support::{cluster, desired, NS};
    use crate::client::ClusterClient;
    use crate::progress::MockProgressSource;
    use crate::testing::FakeClusterClient;
    use cdi_common::consts::{
        ANN_EVENT_SOURCE, ANN_POPULATOR_KIND, LABEL_EXCLUDE_FROM_VELERO_BACKUP, LABEL_OWNED_BY_UID,
        REASON_EXCEEDED_QUOTA,
    };
    use cdi_common::Error;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn phase(ctx: PhaseContext, target: &PersistentVolumeClaim, preallocation: bool, source: MockProgressSource) -> HostClonePhase {
        HostClonePhase {
            ctx,
            owner: target.clone(),
            namespace: NS.into(),
            source_name: "source".into(),
            desired_claim: desired(target, "10Gi"),
            immediate_bind: true,
            preallocation,
            priority_class_name: Some("high".into()),
            progress_source: Arc::new(source),
        }
    }

    fn prime_name(target: &PersistentVolumeClaim) -> String {
        cdi_common::consts::prime_claim_name(target.metadata.uid.as_deref().unwrap())
    }

    async fn running_pod(fake: &FakeClusterClient) {
        fake.create_pod(&Pod {
            metadata: ObjectMeta {
                name: Some("cloner".into()),
                namespace: Some(NS.into()),
                ..Default::default()
            },
            spec: Some(Default::default()),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                pod_ip: Some("10.0.0.7".into()),
                ..Default::default()
            }),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_creates_annotated_prime_claim() {
        let (fake, ctx, target) = cluster(false);
        let phase = phase(ctx, &target, false, MockProgressSource::new());

        let requeue = phase.reconcile().await.unwrap();
        assert_eq!(requeue, Some(Requeue::after(Duration::from_secs(3))));

        let prime = fake.pvc(NS, &prime_name(&target)).unwrap();
        let uid = target.metadata.uid.clone().unwrap();
        assert_eq!(annotation(&prime, ANN_CLONE_REQUEST), Some("ns/source"));
        assert_eq!(annotation(&prime, ANN_PREALLOCATION_REQUESTED), Some("false"));
        assert_eq!(annotation(&prime, ANN_OWNER_UID), Some(uid.as_str()));
        assert_eq!(annotation(&prime, ANN_POD_RESTARTS), Some("0"));
        assert_eq!(annotation(&prime, ANN_IMMEDIATE_BINDING), Some(""));
        assert_eq!(annotation(&prime, ANN_PRIORITY_CLASS_NAME), Some("high"));
        assert_eq!(annotation(&prime, ANN_POPULATOR_KIND), Some("VolumeCloneSource"));
        assert_eq!(annotation(&prime, ANN_EVENT_SOURCE), Some("ns/target"));
        let labels = prime.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(LABEL_OWNED_BY_UID), Some(&uid));
        assert_eq!(labels.get(LABEL_EXCLUDE_FROM_VELERO_BACKUP).map(String::as_str), Some("true"));
        let owner = &prime.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.uid, uid);
        assert_eq!(owner.controller, Some(true));

        // 再次协调不会重复创建
        let writes = fake.write_count();
        phase.reconcile().await.unwrap();
        assert_eq!(fake.write_count(), writes);
    }

    #[tokio::test]
    async fn test_completion_waits_for_preallocation() {
        let (fake, ctx, target) = cluster(false);
        let phase = phase(ctx, &target, true, MockProgressSource::new());
        phase.reconcile().await.unwrap();

        let prime = prime_name(&target);
        fake.update_pvc(NS, &prime, |pvc| {
            set_annotation(&mut pvc.metadata, ANN_POD_PHASE, PHASE_SUCCEEDED);
        });
        assert!(phase.reconcile().await.unwrap().is_some());

        fake.update_pvc(NS, &prime, |pvc| {
            set_annotation(&mut pvc.metadata, ANN_PREALLOCATION_APPLIED, "true");
        });
        assert_eq!(phase.reconcile().await.unwrap(), None);

        let progress = phase.progress().await.unwrap().unwrap();
        assert_eq!(progress.progress, "100.0%");
        assert_eq!(
            progress.annotations.get(ANN_PREALLOCATION_APPLIED).map(String::as_str),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_progress_scraped_from_running_pod() {
        let (fake, ctx, target) = cluster(false);
        let uid = target.metadata.uid.clone().unwrap();
        let mut source = MockProgressSource::new();
        source
            .expect_fetch_metrics()
            .withf(|url| url == "https://10.0.0.7:8443/metrics")
            .times(2)
            .returning(move |_| {
                Ok(format!(
                    "kubevirt_cdi_clone_progress_total{{ownerUID=\"{uid}\"}} 45.678\n"
                ))
            });
        let phase = phase(ctx, &target, false, source);

        // 中间 PVC 尚不存在
        assert_eq!(phase.progress().await.unwrap(), Some(PhaseProgress::default()));

        phase.reconcile().await.unwrap();
        let prime = prime_name(&target);
        assert_eq!(phase.progress().await.unwrap().unwrap().progress, "");

        fake.update_pvc(NS, &prime, |pvc| {
            set_annotation(&mut pvc.metadata, ANN_CLONE_SOURCE_POD, "cloner");
        });
        running_pod(&fake).await;
        assert_eq!(phase.progress().await.unwrap().unwrap().progress, "45.68%");
        assert_eq!(phase.progress().await.unwrap().unwrap().progress, "45.68%");
    }

    #[tokio::test]
    async fn test_full_progress_suppressed_and_scrape_errors_ignored() {
        let (fake, ctx, target) = cluster(false);
        let uid = target.metadata.uid.clone().unwrap();
        let mut source = MockProgressSource::new();
        let mut calls = 0;
        source.expect_fetch_metrics().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(format!("kubevirt_cdi_clone_progress_total{{ownerUID=\"{uid}\"}} 100\n"))
            } else {
                Err(Error::Http("connection refused".into()))
            }
        });
        let phase = phase(ctx, &target, false, source);
        phase.reconcile().await.unwrap();
        fake.update_pvc(NS, &prime_name(&target), |pvc| {
            set_annotation(&mut pvc.metadata, ANN_CLONE_SOURCE_POD, "cloner");
        });
        running_pod(&fake).await;

        assert_eq!(phase.progress().await.unwrap().unwrap().progress, "");
        assert_eq!(phase.progress().await.unwrap().unwrap().progress, "");
    }

    #[tokio::test]
    async fn test_quota_rejection_is_reported_on_target() {
        let (fake, ctx, target) = cluster(false);
        fake.set_quota_exceeded(true);
        let phase = phase(ctx, &target, false, MockProgressSource::new());

        let err = phase.reconcile().await.unwrap_err();
        assert!(err.is_quota_exceeded());
        let events = fake.events_for("target");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, REASON_EXCEEDED_QUOTA);
    }
}
