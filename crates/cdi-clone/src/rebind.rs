//! PV 重绑定
//!
//! 把已绑定 PV 的 `claimRef` 从中间 PVC 改写为目标 PVC。写入以 PV 当前的
//! resourceVersion 为前置条件，与 PV 绑定控制器竞争时只有一方成功。

use cdi_common::{Error, Result};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim};
use tracing::info;

use crate::client::ClusterClient;
use crate::utils::{namespaced_name, uid_of, volume_name};

fn refers_to(reference: &ObjectReference, claim: &PersistentVolumeClaim) -> bool {
    reference.namespace == claim.metadata.namespace
        && reference.name == claim.metadata.name
        && reference.uid == claim.metadata.uid
}

/// 将 `source` 绑定的 PV 改为指向 `target`
///
/// PV 已指向 `target` 时不做任何写入；指向其他 PVC 时返回完整性错误。
pub async fn rebind_volume(
    client: &dyn ClusterClient,
    source: &PersistentVolumeClaim,
    target: &PersistentVolumeClaim,
) -> Result<()> {
    let pv_name = volume_name(source).ok_or_else(|| {
        Error::precondition(format!("claim {} is not bound to a volume", namespaced_name(source)))
    })?;
    let mut pv = client
        .get_pv(pv_name)
        .await?
        .ok_or_else(|| Error::not_found(format!("PersistentVolume {pv_name}")))?;

    let claim_ref = pv
        .spec
        .as_ref()
        .and_then(|s| s.claim_ref.as_ref())
        .ok_or_else(|| Error::integrity(format!("PV {pv_name} has no claim reference")))?;

    if refers_to(claim_ref, target) {
        return Ok(());
    }

    if !refers_to(claim_ref, source) {
        return Err(Error::integrity(format!(
            "PV {} bound to unexpected claim {}",
            pv_name,
            claim_ref.name.as_deref().unwrap_or_default()
        )));
    }

    let rebound = ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        namespace: target.metadata.namespace.clone(),
        name: target.metadata.name.clone(),
        uid: Some(uid_of(target)?),
        resource_version: target.metadata.resource_version.clone(),
        field_path: None,
    };
    if let Some(spec) = pv.spec.as_mut() {
        spec.claim_ref = Some(rebound);
    }

    client.replace_pv(&pv).await?;
    info!(
        "PV {} 已从 {} 重绑定到 {}",
        pv_name,
        namespaced_name(source),
        namespaced_name(target)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClusterClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn claim(name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            spec: Some(Default::default()),
            status: None,
        }
    }

    fn setup() -> (FakeClusterClient, String) {
        let fake = FakeClusterClient::new();
        fake.add_storage_class("sc", "p", false, true);
        let mut prime = claim("prime-T");
        prime.spec.as_mut().unwrap().storage_class_name = Some("sc".into());
        fake.add_pvc(prime);
        fake.add_pvc(claim("target"));
        let pv = fake.provision("ns", "prime-T", "10Gi").unwrap();
        (fake, pv)
    }

    #[tokio::test]
    async fn test_rebind_rewrites_claim_ref_to_target() {
        let (fake, pv_name) = setup();
        let source = fake.pvc("ns", "prime-T").unwrap();
        let target = fake.pvc("ns", "target").unwrap();

        rebind_volume(&fake, &source, &target).await.unwrap();

        let claim_ref = fake.pv(&pv_name).unwrap().spec.unwrap().claim_ref.unwrap();
        assert_eq!(claim_ref.name.as_deref(), Some("target"));
        assert_eq!(claim_ref.uid, target.metadata.uid);
        assert_eq!(claim_ref.resource_version, target.metadata.resource_version);

        // 已指向目标时不再写入
        let writes = fake.write_count();
        rebind_volume(&fake, &source, &target).await.unwrap();
        assert_eq!(fake.write_count(), writes);
    }

    #[tokio::test]
    async fn test_rebind_rejects_foreign_claim() {
        let (fake, pv_name) = setup();
        fake.update_pv(&pv_name, |pv| {
            let claim_ref = pv.spec.as_mut().unwrap().claim_ref.as_mut().unwrap();
            claim_ref.namespace = Some("elsewhere".into());
            claim_ref.name = Some("wrong".into());
        });
        let source = fake.pvc("ns", "prime-T").unwrap();
        let target = fake.pvc("ns", "target").unwrap();

        let err = rebind_volume(&fake, &source, &target).await.unwrap_err();
        assert_eq!(err.to_string(), format!("PV {pv_name} bound to unexpected claim wrong"));
        assert_eq!(err.kind(), cdi_common::ErrorKind::Integrity);
    }

    #[tokio::test]
    async fn test_rebind_loses_race_on_stale_volume() {
        let (fake, pv_name) = setup();
        let source = fake.pvc("ns", "prime-T").unwrap();
        let target = fake.pvc("ns", "target").unwrap();
        let stale = fake.pv(&pv_name).unwrap();

        rebind_volume(&fake, &source, &target).await.unwrap();

        // 使用旧版本的 PV 写入会冲突
        let err = fake.replace_pv(&stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
