//! StorageProfile 自定义资源
//!
//! 以 StorageClass 名称为键的存储能力描述，可提示首选克隆策略和快照类。

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::clone_source::CloneStrategy;

/// StorageProfile 规范（用户可覆盖的部分）
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "cdi.kubevirt.io", version = "v1beta1", kind = "StorageProfile")]
#[kube(status = "StorageProfileStatus")]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_strategy: Option<CloneStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_class: Option<String>,
}

/// StorageProfile 状态（控制器计算后的有效值）
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_strategy: Option<CloneStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_class: Option<String>,
}

impl StorageProfile {
    /// 克隆策略提示，状态优先于规范
    pub fn clone_strategy(&self) -> Option<CloneStrategy> {
        self.status
            .as_ref()
            .and_then(|s| s.clone_strategy)
            .or(self.spec.clone_strategy)
    }

    /// 快照类提示，状态优先于规范
    pub fn snapshot_class(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.snapshot_class.as_deref())
            .or(self.spec.snapshot_class.as_deref())
            .filter(|s| !s.is_empty())
    }
}
