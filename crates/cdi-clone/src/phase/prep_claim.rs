//! PVC 准备阶段
//!
//! 保证中间 PVC 已绑定且实际容量不小于目标请求。WaitForFirstConsumer 的
//! PVC 需要一个消费者 Pod 才会绑定，在线扩容也需要卷被挂载，两种情况都由
//! 一个短暂运行的 PrepPod 解决。

use std::collections::BTreeMap;

use async_trait::async_trait;
use cdi_common::consts::{
    prep_pod_name, ANN_CREATED_BY, ANN_SELECTED_NODE, APP_VALUE, CLONER_DEVICE_PATH, CLONER_MOUNT_PATH,
    DATA_VOLUME_NAME, LABEL_APP, LABEL_CDI_COMPONENT, PREP_CONTAINER_NAME, PREP_POD_COMPONENT_VALUE,
    QEMU_SUBGID,
};
use cdi_common::{CDIConfig, Error, Result};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod,
    PodSecurityContext, PodSpec, SeccompProfile, SecurityContext, Volume, VolumeDevice, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Phase, PhaseContext, Requeue};
use crate::utils::{
    add_ownership_label, annotation, controller_owner_ref, namespaced_name, set_annotation, set_label,
    set_storage_request, storage_capacity_bytes, storage_request, storage_request_bytes, uid_of, volume_mode,
    volume_name, VolumeMode,
};

const POD_SUCCEEDED: &str = "Succeeded";

/// PrepPod 的镜像与安装标签
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PrepPodConfig {
    pub image: String,
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,
    /// 安装器附加在所有工作负载上的标签
    #[serde(default)]
    pub installer_labels: BTreeMap<String, String>,
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

impl Default for PrepPodConfig {
    fn default() -> Self {
        Self {
            image: "quay.io/kubevirt/cdi-importer:latest".to_string(),
            pull_policy: default_pull_policy(),
            installer_labels: BTreeMap::new(),
        }
    }
}

/// 中间 PVC 的绑定与扩容
pub struct PrepClaimPhase {
    pub ctx: PhaseContext,
    pub owner: PersistentVolumeClaim,
    pub desired_claim: PersistentVolumeClaim,
    pub prep: PrepPodConfig,
}

impl PrepClaimPhase {
    fn namespace(&self) -> &str {
        self.owner.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn claim_name(&self) -> &str {
        self.desired_claim.metadata.name.as_deref().unwrap_or_default()
    }

    /// 中间 PVC 是否需要 PrepPod，`None` 表示本轮只需重新排队
    async fn pod_required(&self, claim: &PersistentVolumeClaim) -> Result<Option<bool>> {
        let (Some(desired), Some(requested)) = (
            storage_request_bytes(&self.desired_claim)?,
            storage_request_bytes(claim)?,
        ) else {
            return Err(Error::precondition("requested PVC sizes missing"));
        };

        let Some(actual) = storage_capacity_bytes(claim)? else {
            if volume_name(claim).is_some() {
                // 已绑定但状态尚未刷新
                return Ok(None);
            }
            return Ok(Some(true));
        };

        if requested < desired {
            let mut updated = claim.clone();
            if let Some(size) = storage_request(&self.desired_claim).cloned() {
                set_storage_request(&mut updated, size);
            }
            self.ctx.client.replace_pvc(&updated).await?;
            info!("扩容 {} 的请求大小到 {} 字节", namespaced_name(claim), desired);
            return Ok(None);
        }

        Ok(Some(actual < desired))
    }

    fn build_pod(&self, claim: &PersistentVolumeClaim, config: Option<&CDIConfig>) -> Result<Pod> {
        let mut metadata = ObjectMeta {
            name: Some(prep_pod_name(&uid_of(&self.owner)?)),
            namespace: Some(self.namespace().to_string()),
            labels: Some(self.prep.installer_labels.clone()),
            owner_references: Some(vec![controller_owner_ref(claim)?]),
            ..Default::default()
        };
        set_label(&mut metadata, LABEL_APP, APP_VALUE);
        set_label(&mut metadata, LABEL_CDI_COMPONENT, PREP_POD_COMPONENT_VALUE);
        add_ownership_label(&mut metadata, &self.owner)?;
        set_annotation(&mut metadata, ANN_CREATED_BY, "yes");

        let mut container = Container {
            name: PREP_CONTAINER_NAME.to_string(),
            image: Some(self.prep.image.clone()),
            image_pull_policy: Some(self.prep.pull_policy.clone()),
            command: Some(vec!["/bin/bash".to_string()]),
            args: Some(vec!["-c".into(), "echo".into(), "'hello cdi'".into()]),
            security_context: Some(restricted_container_context()),
            resources: config.and_then(|c| c.spec.pod_resource_requirements.clone()),
            ..Default::default()
        };
        match volume_mode(claim) {
            VolumeMode::Block => {
                container.volume_devices = Some(vec![VolumeDevice {
                    name: DATA_VOLUME_NAME.to_string(),
                    device_path: CLONER_DEVICE_PATH.to_string(),
                }]);
            }
            VolumeMode::Filesystem => {
                container.volume_mounts = Some(vec![VolumeMount {
                    name: DATA_VOLUME_NAME.to_string(),
                    mount_path: CLONER_MOUNT_PATH.to_string(),
                    ..Default::default()
                }]);
            }
        }

        let placement = config.and_then(|c| c.spec.workload.as_ref());
        let pull_secrets = config
            .map(|c| c.spec.image_pull_secrets.clone())
            .filter(|s| !s.is_empty());

        let mut spec = PodSpec {
            containers: vec![container],
            restart_policy: Some("OnFailure".to_string()),
            node_name: annotation(claim, ANN_SELECTED_NODE).map(String::from),
            volumes: Some(vec![Volume {
                name: DATA_VOLUME_NAME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: self.claim_name().to_string(),
                    read_only: None,
                }),
                ..Default::default()
            }]),
            image_pull_secrets: pull_secrets,
            node_selector: placement
                .map(|p| p.node_selector.clone())
                .filter(|s| !s.is_empty()),
            affinity: placement.and_then(|p| p.affinity.clone()),
            tolerations: placement
                .map(|p| p.tolerations.clone())
                .filter(|t| !t.is_empty()),
            ..Default::default()
        };
        if volume_mode(claim) == VolumeMode::Filesystem {
            spec.security_context = Some(PodSecurityContext {
                fs_group: Some(QEMU_SUBGID),
                ..Default::default()
            });
        }

        Ok(Pod {
            metadata,
            spec: Some(spec),
            status: None,
        })
    }
}

fn runtime_default_seccomp() -> SeccompProfile {
    SeccompProfile {
        type_: "RuntimeDefault".to_string(),
        localhost_profile: None,
    }
}

fn restricted_container_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add: None,
        }),
        run_as_non_root: Some(true),
        run_as_user: Some(QEMU_SUBGID),
        seccomp_profile: Some(runtime_default_seccomp()),
        ..Default::default()
    }
}

#[async_trait]
impl Phase for PrepClaimPhase {
    fn name(&self) -> &'static str {
        "PrepClaim"
    }

    async fn reconcile(&self) -> Result<Option<Requeue>> {
        let claim = self
            .ctx
            .client
            .get_pvc(self.namespace(), self.claim_name())
            .await?
            .ok_or_else(|| Error::precondition(format!("claim {}/{} disappeared", self.namespace(), self.claim_name())))?;

        let Some(pod_required) = self.pod_required(&claim).await? else {
            return Ok(Some(Requeue::default()));
        };

        let pod_name = prep_pod_name(&uid_of(&self.owner)?);
        let pod = self.ctx.client.get_pod(self.namespace(), &pod_name).await?;

        match pod {
            None if !pod_required => return Ok(None),
            None => {
                let config = self.ctx.client.get_cdi_config().await?;
                let pod = self.build_pod(&claim, config.as_ref())?;
                self.ctx.create_pod(&self.owner, &pod).await?;
                info!("为 {} 创建 PrepPod {}", namespaced_name(&claim), pod_name);
            }
            Some(pod) => {
                let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
                if phase == Some(POD_SUCCEEDED) {
                    self.ctx.client.delete_pod(self.namespace(), &pod_name).await?;
                    debug!("PrepPod {} 已完成，删除", pod_name);
                }
            }
        }
        Ok(Some(Requeue::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::test_support::{claim, cluster, desired, NS};
    use crate::testing::FakeClusterClient;
    use cdi_common::consts::prime_claim_name;
    use cdi_common::{CDIConfigSpec, NodePlacement};
    use k8s_openapi::api::core::v1::{LocalObjectReference, PodStatus};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::sync::Arc;

    fn phase(ctx: PhaseContext, target: &PersistentVolumeClaim, size: &str) -> PrepClaimPhase {
        PrepClaimPhase {
            ctx,
            owner: target.clone(),
            desired_claim: desired(target, size),
            prep: PrepPodConfig {
                image: "cdi-importer:v1".into(),
                pull_policy: "Always".into(),
                installer_labels: BTreeMap::from([("app.kubernetes.io/part-of".to_string(), "cdi".to_string())]),
            },
        }
    }

    fn add_prime(fake: &FakeClusterClient, target: &PersistentVolumeClaim, size: &str) -> String {
        let name = prime_claim_name(target.metadata.uid.as_deref().unwrap());
        fake.add_pvc(claim(&name, size));
        name
    }

    fn prep_name(target: &PersistentVolumeClaim) -> String {
        prep_pod_name(target.metadata.uid.as_deref().unwrap())
    }

    fn finish_pod(fake: &FakeClusterClient, target: &PersistentVolumeClaim) {
        fake.update_pod(NS, &prep_name(target), |pod| {
            pod.status = Some(PodStatus {
                phase: Some("Succeeded".into()),
                ..Default::default()
            });
        });
    }

    #[tokio::test]
    async fn test_missing_prime_is_fatal() {
        let (_fake, ctx, target) = cluster(true);
        let err = phase(ctx, &target, "10Gi").reconcile().await.unwrap_err();
        assert!(err.to_string().ends_with("disappeared"));
        assert!(err.kind().is_fatal());
    }

    #[tokio::test]
    async fn test_bound_prime_with_enough_capacity_is_done() {
        let (fake, ctx, target) = cluster(false);
        let prime = add_prime(&fake, &target, "10Gi");
        fake.provision(NS, &prime, "10Gi");

        assert_eq!(phase(ctx, &target, "10Gi").reconcile().await.unwrap(), None);
        assert!(fake.pod_names(NS).is_empty());
    }

    #[tokio::test]
    async fn test_unbound_wffc_prime_gets_prep_pod() {
        let (fake, ctx, target) = cluster(true);
        let prime = add_prime(&fake, &target, "10Gi");
        fake.update_pvc(NS, &prime, |pvc| {
            set_annotation(&mut pvc.metadata, ANN_SELECTED_NODE, "node-1");
        });
        let mut config = CDIConfig::new("config", CDIConfigSpec::default());
        config.spec.image_pull_secrets = vec![LocalObjectReference {
            name: Some("registry".into()),
        }];
        config.spec.workload = Some(NodePlacement {
            node_selector: BTreeMap::from([("zone".to_string(), "a".to_string())]),
            ..Default::default()
        });
        fake.set_cdi_config(config);
        let phase = phase(ctx, &target, "10Gi");

        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        let pod = fake.pod(NS, &prep_name(&target)).unwrap();
        let labels = pod.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(LABEL_CDI_COMPONENT).map(String::as_str), Some("cdi-populator-prep"));
        assert_eq!(labels.get(LABEL_APP).map(String::as_str), Some("containerized-data-importer"));
        assert_eq!(labels.get("app.kubernetes.io/part-of").map(String::as_str), Some("cdi"));
        let owner = &pod.metadata.owner_references.clone().unwrap()[0];
        assert_eq!(owner.name, prime);

        let spec = pod.spec.unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("node-1"));
        assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(spec.image_pull_secrets.unwrap()[0].name.as_deref(), Some("registry"));
        assert_eq!(spec.node_selector.unwrap().get("zone").map(String::as_str), Some("a"));
        let container = &spec.containers[0];
        assert_eq!(container.name, "dummy");
        assert_eq!(container.image.as_deref(), Some("cdi-importer:v1"));
        assert_eq!(container.volume_mounts.as_ref().unwrap()[0].mount_path, CLONER_MOUNT_PATH);
        assert_eq!(
            container.security_context.as_ref().unwrap().allow_privilege_escalation,
            Some(false)
        );

        // Pod 运行后 PVC 绑定，Pod 完成后被删除
        fake.provision(NS, &prime, "10Gi");
        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        assert!(fake.pod(NS, &prep_name(&target)).is_some());
        finish_pod(&fake, &target);
        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        assert!(fake.pod_names(NS).is_empty());
        assert_eq!(phase.reconcile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_block_prime_exposes_device() {
        let (fake, ctx, target) = cluster(true);
        let prime = add_prime(&fake, &target, "10Gi");
        fake.update_pvc(NS, &prime, |pvc| {
            pvc.spec.as_mut().unwrap().volume_mode = Some("Block".into());
        });
        phase(ctx, &target, "10Gi").reconcile().await.unwrap();

        let pod = fake.pod(NS, &prep_name(&target)).unwrap();
        let container = &pod.spec.unwrap().containers[0];
        assert_eq!(container.volume_devices.as_ref().unwrap()[0].device_path, CLONER_DEVICE_PATH);
        assert!(container.volume_mounts.is_none());
    }

    #[tokio::test]
    async fn test_small_prime_is_expanded_then_resized_online() {
        let (fake, ctx, target) = cluster(false);
        let prime = add_prime(&fake, &target, "10Gi");
        fake.provision(NS, &prime, "10Gi");
        let phase = phase(ctx, &target, "15Gi");

        // 先把请求调大
        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        assert_eq!(
            storage_request(&fake.pvc(NS, &prime).unwrap()),
            Some(&Quantity("15Gi".into()))
        );

        // 容量仍小于请求，需要 PrepPod 触发在线扩容
        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        assert!(fake.pod(NS, &prep_name(&target)).is_some());

        fake.resize_to_request(NS, &prime);
        finish_pod(&fake, &target);
        assert_eq!(phase.reconcile().await.unwrap(), Some(Requeue::default()));
        assert_eq!(phase.reconcile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prep_pod_quota_rejection_is_reported_on_target() {
        let (fake, ctx, target) = cluster(true);
        add_prime(&fake, &target, "10Gi");
        fake.set_quota_exceeded(true);

        let err = phase(ctx, &target, "10Gi").reconcile().await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(fake.pod_names(NS).is_empty());
        let reasons: Vec<_> = fake.events_for("target").into_iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec![cdi_common::consts::REASON_EXCEEDED_QUOTA.to_string()]);
    }

    #[tokio::test]
    async fn test_bound_without_capacity_requeues() {
        let fake = Arc::new(FakeClusterClient::new());
        fake.add_storage_class("sc", "p", false, true);
        let target = fake.add_pvc(claim("target", "10Gi"));
        let prime = add_prime(&fake, &target, "10Gi");
        fake.update_pvc(NS, &prime, |pvc| {
            pvc.spec.as_mut().unwrap().volume_name = Some("pv-1".into());
        });
        let ctx = PhaseContext::new(fake.clone(), fake.clone());

        assert_eq!(phase(ctx, &target, "10Gi").reconcile().await.unwrap(), Some(Requeue::default()));
        assert!(fake.pod_names(NS).is_empty());
    }
}
