//! 快照恢复阶段
//!
//! 以 VolumeSnapshot 为 dataSource 创建中间 PVC。快照的 restoreSize
//! 非零时作为请求大小；为零时沿用期望大小并在目标上记录告警。

use async_trait::async_trait;
use cdi_common::consts::{REASON_RESTORE_SIZE_ZERO, SNAPSHOT_API_GROUP};
use cdi_common::quantity::{parse_quantity, quantity_eq};
use cdi_common::{Error, Result, VolumeSnapshot};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, TypedLocalObjectReference, TypedObjectReference};
use tracing::{debug, info, warn};

use super::{intermediate_claim, Phase, PhaseContext, Requeue};
use crate::events::CloneEvent;
use crate::utils::{namespaced_name, object_reference, set_storage_request, storage_capacity, storage_request};

/// 从快照恢复
pub struct SnapshotClonePhase {
    pub ctx: PhaseContext,
    pub owner: PersistentVolumeClaim,
    pub namespace: String,
    pub source_name: String,
    pub desired_claim: PersistentVolumeClaim,
}

impl SnapshotClonePhase {
    fn claim_name(&self) -> &str {
        self.desired_claim.metadata.name.as_deref().unwrap_or_default()
    }

    /// restoreSize 为零时，源 PVC 容量与期望大小不一致则提示用户
    async fn warn_zero_restore_size(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        let Some(source_claim) = snapshot.spec.source.persistent_volume_claim_name.as_deref() else {
            return Ok(());
        };
        let Some(source) = self.ctx.client.get_pvc(&self.namespace, source_claim).await? else {
            return Ok(());
        };
        let (Some(capacity), Some(request)) = (storage_capacity(&source), storage_request(&self.desired_claim)) else {
            return Ok(());
        };
        if quantity_eq(capacity, request) {
            return Ok(());
        }
        warn!(
            "快照 {} 的 restoreSize 为 0，使用请求大小 {}",
            namespaced_name(snapshot),
            request.0
        );
        self.ctx
            .recorder
            .record(
                &object_reference(&self.owner),
                CloneEvent::warning(
                    REASON_RESTORE_SIZE_ZERO,
                    format!(
                        "VolumeSnapshot {} has restoreSize 0, using requested size {} instead of source size {}",
                        namespaced_name(snapshot),
                        request.0,
                        capacity.0
                    ),
                ),
            )
            .await;
        Ok(())
    }

    async fn create_claim(&self, snapshot: &VolumeSnapshot) -> Result<PersistentVolumeClaim> {
        let restore_size = snapshot
            .restore_size()
            .cloned()
            .ok_or_else(|| Error::precondition("snapshot missing restoresize"))?;

        let mut claim = intermediate_claim(&self.desired_claim, &self.namespace, &self.owner)?;
        let spec = claim.spec.get_or_insert_with(Default::default);
        spec.data_source = Some(TypedLocalObjectReference {
            api_group: Some(SNAPSHOT_API_GROUP.to_string()),
            kind: "VolumeSnapshot".to_string(),
            name: self.source_name.clone(),
        });
        spec.data_source_ref = Some(TypedObjectReference {
            api_group: Some(SNAPSHOT_API_GROUP.to_string()),
            kind: "VolumeSnapshot".to_string(),
            name: self.source_name.clone(),
            namespace: None,
        });

        if parse_quantity(&restore_size)? > 0 {
            set_storage_request(&mut claim, restore_size);
        } else {
            self.warn_zero_restore_size(snapshot).await?;
        }

        let created = self.ctx.create_claim(&self.owner, &claim).await?;
        info!(
            "为 {} 从快照 {} 创建 PVC {}",
            namespaced_name(&self.owner),
            self.source_name,
            namespaced_name(&created)
        );
        Ok(created)
    }
}

#[async_trait]
impl Phase for SnapshotClonePhase {
    fn name(&self) -> &'static str {
        "SnapshotClone"
    }

    async fn reconcile(&self) -> Result<Option<Requeue>> {
        let claim = match self.ctx.client.get_pvc(&self.namespace, self.claim_name()).await? {
            Some(claim) => claim,
            None => {
                let snapshot = self
                    .ctx
                    .client
                    .get_volume_snapshot(&self.namespace, &self.source_name)
                    .await?
                    .ok_or_else(|| Error::precondition("source snapshot does not exist"))?;
                if !snapshot.ready_to_use() {
                    debug!("快照 {} 尚未可用", namespaced_name(&snapshot));
                    return Ok(Some(Requeue::default()));
                }
                self.create_claim(&snapshot).await?
            }
        };

        self.ctx.mirror_events(&claim, &self.owner).await;

        if self.ctx.resolver().claim_bound_or_wffc(&claim).await? {
            return Ok(None);
        }
        Ok(Some(Requeue::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::test_support::{cluster, desired, NS};
    use cdi_common::{VolumeSnapshotSource, VolumeSnapshotSpec};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn snapshot(name: &str) -> VolumeSnapshot {
        let mut snapshot = VolumeSnapshot::new(
            name,
            VolumeSnapshotSpec {
                source: VolumeSnapshotSource {
                    persistent_volume_claim_name: Some("source".into()),
                    volume_snapshot_content_name: None,
                },
                volume_snapshot_class_name: Some("vsc".into()),
            },
        );
        snapshot.metadata.namespace = Some(NS.into());
        snapshot
    }

    fn phase(ctx: PhaseContext, target: &PersistentVolumeClaim, size: &str) -> SnapshotClonePhase {
        SnapshotClonePhase {
            ctx,
            owner: target.clone(),
            namespace: NS.into(),
            source_name: "snap".into(),
            desired_claim: desired(target, size),
        }
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_fatal() {
        let (_fake, ctx, target) = cluster(false);
        let err = phase(ctx, &target, "10Gi").reconcile().await.unwrap_err();
        assert_eq!(err.to_string(), "source snapshot does not exist");
        assert!(err.kind().is_fatal());
    }

    #[tokio::test]
    async fn test_restores_with_snapshot_size_once_ready() {
        let (fake, ctx, target) = cluster(false);
        fake.add_volume_snapshot(snapshot("snap"));
        let phase = phase(ctx, &target, "15Gi");

        // 快照尚不可用
        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        assert!(fake.pvc(NS, phase.claim_name()).is_none());

        fake.complete_snapshot(NS, "snap", "10Gi");
        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        let prime = fake.pvc(NS, phase.claim_name()).unwrap();
        assert_eq!(storage_request(&prime), Some(&Quantity("10Gi".into())));
        let data_source_ref = prime.spec.unwrap().data_source_ref.unwrap();
        assert_eq!(data_source_ref.api_group.as_deref(), Some(SNAPSHOT_API_GROUP));
        assert_eq!(data_source_ref.kind, "VolumeSnapshot");

        fake.provision(NS, phase.claim_name(), "10Gi");
        assert_eq!(phase.reconcile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_restore_size_keeps_request_and_warns() {
        let (fake, ctx, target) = cluster(false);
        fake.add_volume_snapshot(snapshot("snap"));
        fake.complete_snapshot(NS, "snap", "0");
        let phase = phase(ctx, &target, "15Gi");

        phase.reconcile().await.unwrap();
        let prime = fake.pvc(NS, phase.claim_name()).unwrap();
        assert_eq!(storage_request(&prime), Some(&Quantity("15Gi".into())));
        let events = fake.events_for("target");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, REASON_RESTORE_SIZE_ZERO);
    }

    #[tokio::test]
    async fn test_missing_restore_size_is_fatal() {
        let (fake, ctx, target) = cluster(false);
        fake.add_volume_snapshot(snapshot("snap"));
        fake.update_snapshot(NS, "snap", |s| {
            s.status = Some(cdi_common::VolumeSnapshotStatus {
                ready_to_use: Some(true),
                ..Default::default()
            });
        });
        let err = phase(ctx, &target, "10Gi").reconcile().await.unwrap_err();
        assert_eq!(err.to_string(), "snapshot missing restoresize");
    }
}
