//! 重绑定阶段

use async_trait::async_trait;
use cdi_common::{Error, Result};
use tracing::debug;

use super::{Phase, PhaseContext, Requeue};
use crate::rebind::rebind_volume;
use crate::utils::volume_name;

/// 把中间 PVC 的 PV 交给目标 PVC
pub struct RebindPhase {
    pub ctx: PhaseContext,
    pub source_namespace: String,
    pub source_name: String,
    pub target_namespace: String,
    pub target_name: String,
}

#[async_trait]
impl Phase for RebindPhase {
    fn name(&self) -> &'static str {
        "Rebind"
    }

    async fn reconcile(&self) -> Result<Option<Requeue>> {
        let target = self
            .ctx
            .client
            .get_pvc(&self.target_namespace, &self.target_name)
            .await?
            .ok_or_else(|| Error::precondition("target claim does not exist"))?;
        if volume_name(&target).is_some() {
            return Ok(None);
        }

        let source = self
            .ctx
            .client
            .get_pvc(&self.source_namespace, &self.source_name)
            .await?
            .ok_or_else(|| Error::precondition("source claim does not exist"))?;

        rebind_volume(self.ctx.client.as_ref(), &source, &target).await?;
        // 等待绑定控制器完成目标 PVC 一侧的绑定
        debug!("等待 {}/{} 绑定", self.target_namespace, self.target_name);
        Ok(Some(Requeue::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::test_support::{claim, cluster, NS};

    fn phase(ctx: PhaseContext) -> RebindPhase {
        RebindPhase {
            ctx,
            source_namespace: NS.into(),
            source_name: "prime-T".into(),
            target_namespace: NS.into(),
            target_name: "target".into(),
        }
    }

    #[tokio::test]
    async fn test_rebind_hands_volume_to_target() {
        let (fake, ctx, _target) = cluster(false);
        fake.add_pvc(claim("prime-T", "10Gi"));
        let pv = fake.provision(NS, "prime-T", "10Gi").unwrap();
        let phase = phase(ctx);

        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        let claim_ref = fake.pv(&pv).unwrap().spec.unwrap().claim_ref.unwrap();
        assert_eq!(claim_ref.name.as_deref(), Some("target"));

        // 绑定控制器接管后完成
        fake.run_binder();
        assert_eq!(fake.pvc(NS, "target").unwrap().spec.unwrap().volume_name, Some(pv));
        assert_eq!(phase.reconcile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_claims_are_fatal() {
        let (fake, ctx, _target) = cluster(false);
        let phase = phase(ctx);
        let err = phase.reconcile().await.unwrap_err();
        assert_eq!(err.to_string(), "source claim does not exist");

        fake.delete_pvc_now(NS, "target");
        let err = phase.reconcile().await.unwrap_err();
        assert_eq!(err.to_string(), "target claim does not exist");
    }
}
