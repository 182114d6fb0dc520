//! CSI 克隆阶段
//!
//! 以源 PVC 为 dataSource 创建中间 PVC，由 CSI 驱动完成卷克隆。

use async_trait::async_trait;
use cdi_common::{Error, Result};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, TypedLocalObjectReference, TypedObjectReference};
use tracing::{debug, info};

use super::{intermediate_claim, Phase, PhaseContext, Requeue, SOURCE_READY_REQUEUE};
use crate::readiness::is_source_claim_ready;
use crate::utils::{namespaced_name, set_storage_request, storage_capacity};

/// CSI 卷克隆
pub struct CsiClonePhase {
    pub ctx: PhaseContext,
    pub owner: PersistentVolumeClaim,
    pub namespace: String,
    pub source_name: String,
    pub desired_claim: PersistentVolumeClaim,
}

impl CsiClonePhase {
    fn claim_name(&self) -> &str {
        self.desired_claim.metadata.name.as_deref().unwrap_or_default()
    }

    async fn create_claim(&self) -> Result<PersistentVolumeClaim> {
        let source = self
            .ctx
            .client
            .get_pvc(&self.namespace, &self.source_name)
            .await?
            .ok_or_else(|| Error::precondition("source claim does not exist"))?;
        let capacity = storage_capacity(&source)
            .cloned()
            .ok_or_else(|| Error::precondition("source claim has no capacity"))?;

        let mut claim = intermediate_claim(&self.desired_claim, &self.namespace, &self.owner)?;
        let spec = claim.spec.get_or_insert_with(Default::default);
        spec.data_source = Some(TypedLocalObjectReference {
            api_group: None,
            kind: "PersistentVolumeClaim".to_string(),
            name: self.source_name.clone(),
        });
        spec.data_source_ref = Some(TypedObjectReference {
            api_group: None,
            kind: "PersistentVolumeClaim".to_string(),
            name: self.source_name.clone(),
            namespace: None,
        });
        // CSI 克隆要求新卷与源卷等大，扩容留给后续的 PrepClaim
        set_storage_request(&mut claim, capacity);

        let created = self.ctx.create_claim(&self.owner, &claim).await?;
        info!(
            "为 {} 创建 CSI 克隆 PVC {}",
            namespaced_name(&self.owner),
            namespaced_name(&created)
        );
        Ok(created)
    }
}

#[async_trait]
impl Phase for CsiClonePhase {
    fn name(&self) -> &'static str {
        "CSIClone"
    }

    async fn reconcile(&self) -> Result<Option<Requeue>> {
        let claim = match self.ctx.client.get_pvc(&self.namespace, self.claim_name()).await? {
            Some(claim) => claim,
            None => {
                let ready = is_source_claim_ready(
                    self.ctx.client.as_ref(),
                    self.ctx.recorder.as_ref(),
                    &self.owner,
                    &self.namespace,
                    &self.source_name,
                )
                .await?;
                if !ready {
                    debug!("源 PVC {}/{} 尚未就绪", self.namespace, self.source_name);
                    return Ok(Some(Requeue::after(SOURCE_READY_REQUEUE)));
                }
                self.create_claim().await?
            }
        };

        if self.ctx.resolver().claim_bound_or_wffc(&claim).await? {
            return Ok(None);
        }
        Ok(Some(Requeue::default()))
    }
}
