//! 存储能力解析
//!
//! 根据 PVC 解析其 StorageClass、绑定模式、CSI 驱动、卷扩容策略、卷模式，
//! 以及 StorageProfile 给出的克隆策略和快照类提示。

use std::sync::Arc;

use cdi_common::{CloneStrategy, Error, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::debug;

use crate::client::ClusterClient;
use crate::utils::{allows_expansion, is_wffc, namespaced_name, storage_class_name, volume_mode, volume_name, VolumeMode};

/// 卷绑定模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Immediate,
    WaitForFirstConsumer,
}

/// 单个 PVC 的存储能力
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimCapabilities {
    pub storage_class: String,
    pub binding_mode: BindingMode,
    pub provisioner: String,
    pub allow_expansion: bool,
    pub volume_mode: VolumeMode,
    /// StorageProfile 的克隆策略提示
    pub clone_strategy: Option<CloneStrategy>,
    /// StorageProfile 的快照类提示
    pub snapshot_class: Option<String>,
}

/// 存储能力解析器
#[derive(Clone)]
pub struct CapabilityResolver {
    client: Arc<dyn ClusterClient>,
}

impl CapabilityResolver {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// PVC 的 StorageClass；名称为空或对象不存在时返回 `None`
    pub async fn storage_class_for_claim(&self, claim: &PersistentVolumeClaim) -> Result<Option<StorageClass>> {
        match storage_class_name(claim) {
            Some(name) if !name.is_empty() => self.client.get_storage_class(name).await,
            _ => Ok(None),
        }
    }

    /// 解析 PVC 的完整存储能力
    ///
    /// StorageClass 未设置或尚不存在时返回 `None`，空字符串名称为永久错误。
    pub async fn resolve_claim_capabilities(&self, claim: &PersistentVolumeClaim) -> Result<Option<ClaimCapabilities>> {
        let name = match storage_class_name(claim) {
            None => return Ok(None),
            Some("") => {
                return Err(Error::precondition(
                    "claim has emptystring storageclass, will not work",
                ))
            }
            Some(name) => name,
        };

        let Some(sc) = self.client.get_storage_class(name).await? else {
            debug!("{} 的 StorageClass {} 尚不存在", namespaced_name(claim), name);
            return Ok(None);
        };

        let profile = self.client.get_storage_profile(name).await?;
        Ok(Some(ClaimCapabilities {
            storage_class: name.to_string(),
            binding_mode: if is_wffc(&sc) {
                BindingMode::WaitForFirstConsumer
            } else {
                BindingMode::Immediate
            },
            provisioner: sc.provisioner.clone(),
            allow_expansion: allows_expansion(&sc),
            volume_mode: volume_mode(claim),
            clone_strategy: profile.as_ref().and_then(|p| p.clone_strategy()),
            snapshot_class: profile.as_ref().and_then(|p| p.snapshot_class()).map(String::from),
        }))
    }

    /// 单个 PVC 的驱动：已绑定 PV 的 CSI 驱动优先，否则取 StorageClass 的 provisioner
    async fn claim_driver(&self, claim: &PersistentVolumeClaim) -> Result<Option<String>> {
        if let Some(pv_name) = volume_name(claim) {
            if let Some(pv) = self.client.get_pv(pv_name).await? {
                if let Some(csi) = pv.spec.as_ref().and_then(|s| s.csi.as_ref()) {
                    return Ok(Some(csi.driver.clone()));
                }
            }
        }
        Ok(self
            .storage_class_for_claim(claim)
            .await?
            .map(|sc| sc.provisioner))
    }

    /// 多个 PVC 共同的 CSI 驱动，驱动不一致或无法解析时返回 `None`
    pub async fn common_csi_driver(&self, claims: &[&PersistentVolumeClaim]) -> Result<Option<String>> {
        let mut common: Option<String> = None;
        for claim in claims {
            let Some(driver) = self.claim_driver(claim).await? else {
                return Ok(None);
            };
            match &common {
                Some(existing) if *existing != driver => return Ok(None),
                Some(_) => {}
                None => common = Some(driver),
            }
        }
        Ok(common)
    }

    /// 源与目标共同可用的快照类
    ///
    /// 驱动必须等于共同驱动；目标 StorageProfile 指定了快照类时必须与之同名。
    /// 多个候选时按名称排序取第一个。
    pub async fn compatible_snapshot_class(
        &self,
        source: &PersistentVolumeClaim,
        target: &PersistentVolumeClaim,
    ) -> Result<Option<String>> {
        let Some(driver) = self.common_csi_driver(&[source, target]).await? else {
            return Ok(None);
        };

        let hint = match storage_class_name(target).filter(|n| !n.is_empty()) {
            Some(sc) => self
                .client
                .get_storage_profile(sc)
                .await?
                .and_then(|p| p.snapshot_class().map(String::from)),
            None => None,
        };

        let mut candidates: Vec<String> = self
            .client
            .list_volume_snapshot_classes()
            .await?
            .into_iter()
            .filter(|vsc| vsc.driver == driver)
            .filter_map(|vsc| vsc.metadata.name)
            .filter(|name| hint.as_deref().map(|h| h == name).unwrap_or(true))
            .collect();
        candidates.sort();
        Ok(candidates.into_iter().next())
    }

    /// PVC 已绑定，或其 StorageClass 为 WaitForFirstConsumer
    pub async fn claim_bound_or_wffc(&self, claim: &PersistentVolumeClaim) -> Result<bool> {
        if volume_name(claim).is_some() {
            return Ok(true);
        }
        let sc = self
            .storage_class_for_claim(claim)
            .await?
            .ok_or_else(|| Error::precondition("no storageclass for pvc"))?;
        Ok(is_wffc(&sc))
    }
}
