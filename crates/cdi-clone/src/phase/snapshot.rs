//! 快照阶段
//!
//! 为源 PVC 创建临时 VolumeSnapshot，等待快照控制器写入创建时间。

use async_trait::async_trait;
use cdi_common::consts::{CDI_COMPONENT_VALUE, LABEL_CDI_COMPONENT};
use cdi_common::{Result, VolumeSnapshot, VolumeSnapshotSource, VolumeSnapshotSpec};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tracing::{debug, info};

use super::{Phase, PhaseContext, Requeue, SOURCE_READY_REQUEUE};
use crate::readiness::is_source_claim_ready;
use crate::utils::{add_ownership_label, namespaced_name, set_label};

/// 源 PVC 快照
pub struct SnapshotPhase {
    pub ctx: PhaseContext,
    pub owner: PersistentVolumeClaim,
    pub source_namespace: String,
    pub source_name: String,
    pub target_name: String,
    pub snapshot_class: String,
}

impl SnapshotPhase {
    fn build_snapshot(&self) -> Result<VolumeSnapshot> {
        let mut snapshot = VolumeSnapshot::new(
            &self.target_name,
            VolumeSnapshotSpec {
                source: VolumeSnapshotSource {
                    persistent_volume_claim_name: Some(self.source_name.clone()),
                    volume_snapshot_content_name: None,
                },
                volume_snapshot_class_name: Some(self.snapshot_class.clone()),
            },
        );
        snapshot.metadata.namespace = Some(self.source_namespace.clone());
        set_label(&mut snapshot.metadata, LABEL_CDI_COMPONENT, CDI_COMPONENT_VALUE);
        add_ownership_label(&mut snapshot.metadata, &self.owner)?;
        Ok(snapshot)
    }
}

#[async_trait]
impl Phase for SnapshotPhase {
    fn name(&self) -> &'static str {
        "Snapshot"
    }

    async fn reconcile(&self) -> Result<Option<Requeue>> {
        let existing = self
            .ctx
            .client
            .get_volume_snapshot(&self.source_namespace, &self.target_name)
            .await?;

        let snapshot = match existing {
            Some(snapshot) => snapshot,
            None => {
                let ready = is_source_claim_ready(
                    self.ctx.client.as_ref(),
                    self.ctx.recorder.as_ref(),
                    &self.owner,
                    &self.source_namespace,
                    &self.source_name,
                )
                .await?;
                if !ready {
                    debug!("源 PVC {}/{} 尚未就绪", self.source_namespace, self.source_name);
                    return Ok(Some(Requeue::after(SOURCE_READY_REQUEUE)));
                }
                let created = self
                    .ctx
                    .create_snapshot(&self.owner, &self.build_snapshot()?)
                    .await?;
                info!(
                    "为 {} 创建快照 {}，快照类 {}",
                    namespaced_name(&self.owner),
                    namespaced_name(&created),
                    self.snapshot_class
                );
                created
            }
        };

        if snapshot.created() {
            return Ok(None);
        }
        Ok(Some(Requeue::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::test_support::{cluster, NS};

    fn phase(ctx: PhaseContext, target: &PersistentVolumeClaim) -> SnapshotPhase {
        SnapshotPhase {
            ctx,
            owner: target.clone(),
            source_namespace: NS.into(),
            source_name: "source".into(),
            target_name: "tmp-snapshot-T".into(),
            snapshot_class: "vsc".into(),
        }
    }

    #[tokio::test]
    async fn test_creates_labelled_snapshot_and_waits_for_creation() {
        let (fake, ctx, target) = cluster(false);
        let phase = phase(ctx, &target);

        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        let snapshot = fake.snapshot(NS, "tmp-snapshot-T").unwrap();
        assert_eq!(snapshot.spec.source.persistent_volume_claim_name.as_deref(), Some("source"));
        assert_eq!(snapshot.spec.volume_snapshot_class_name.as_deref(), Some("vsc"));
        let labels = snapshot.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_CDI_COMPONENT).map(String::as_str), Some("cdi"));
        assert_eq!(
            labels.get(cdi_common::consts::LABEL_OWNED_BY_UID),
            target.metadata.uid.as_ref()
        );

        fake.complete_snapshot(NS, "tmp-snapshot-T", "10Gi");
        assert_eq!(phase.reconcile().await.unwrap(), None);
        assert_eq!(fake.snapshot_names(NS), vec!["tmp-snapshot-T".to_string()]);
    }

    #[tokio::test]
    async fn test_unbound_source_is_not_snapshotted() {
        let (fake, ctx, target) = cluster(false);
        let mut phase = phase(ctx, &target);
        phase.source_name = "missing".into();

        assert_eq!(
            phase.reconcile().await.unwrap(),
            Some(Requeue::after(SOURCE_READY_REQUEUE))
        );
        assert!(fake.snapshot_names(NS).is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejection_is_reported_on_target() {
        let (fake, ctx, target) = cluster(false);
        fake.set_quota_exceeded(true);
        let phase = phase(ctx, &target);

        let err = phase.reconcile().await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(fake.snapshot_names(NS).is_empty());
        let events = fake.events_for("target");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, cdi_common::consts::REASON_EXCEEDED_QUOTA);
        assert_eq!(
            events[0].message,
            "volumesnapshots \"tmp-snapshot-T\" is forbidden: exceeded quota: count/volumesnapshots"
        );
    }
}
