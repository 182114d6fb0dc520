//! CDIConfig 自定义资源
//!
//! 集群级单例（名称为 `config`），提供克隆策略覆盖、文件系统开销、
//! 特性门控以及工作 Pod 的调度与镜像拉取配置。

use k8s_openapi::api::core::v1::{Affinity, LocalObjectReference, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::clone_source::CloneStrategy;
use crate::consts::DEFAULT_FS_OVERHEAD;

/// CDIConfig 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "cdi.kubevirt.io", version = "v1beta1", kind = "CDIConfig")]
#[kube(status = "CDIConfigStatus")]
#[serde(rename_all = "camelCase")]
pub struct CDIConfigSpec {
    /// 全局克隆策略覆盖
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_strategy_override: Option<CloneStrategy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_gates: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_overhead: Option<FilesystemOverhead>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// 工作 Pod 的节点放置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<NodePlacement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_resource_requirements: Option<ResourceRequirements>,
}

/// 文件系统开销，值为 `[0, 1)` 区间的小数字符串
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemOverhead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,

    /// 按 StorageClass 名称覆盖
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage_class: BTreeMap<String, String>,
}

impl FilesystemOverhead {
    fn lookup(&self, storage_class: Option<&str>) -> Option<&str> {
        storage_class
            .and_then(|sc| self.storage_class.get(sc))
            .or(self.global.as_ref())
            .map(String::as_str)
    }
}

/// 节点放置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// CDIConfig 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CDIConfigStatus {
    /// 控制器解析后的文件系统开销
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_overhead: Option<FilesystemOverhead>,

    /// 集群默认的预分配设置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preallocation: Option<bool>,
}

impl CDIConfig {
    /// 指定 StorageClass 的文件系统开销，依次查找状态、规范、默认值
    pub fn filesystem_overhead(&self, storage_class: Option<&str>) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.filesystem_overhead.as_ref())
            .and_then(|o| o.lookup(storage_class))
            .or_else(|| {
                self.spec
                    .filesystem_overhead
                    .as_ref()
                    .and_then(|o| o.lookup(storage_class))
            })
            .unwrap_or(DEFAULT_FS_OVERHEAD)
    }

    /// 集群默认预分配，状态未写入时为 false
    pub fn preallocation(&self) -> bool {
        self.status.as_ref().and_then(|s| s.preallocation).unwrap_or(false)
    }

    pub fn feature_gate_enabled(&self, gate: &str) -> bool {
        self.spec.feature_gates.iter().any(|g| g == gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_overhead_lookup_order() {
        let mut config = CDIConfig::new("config", CDIConfigSpec::default());
        assert_eq!(config.filesystem_overhead(Some("sc")), DEFAULT_FS_OVERHEAD);

        config.spec.filesystem_overhead = Some(FilesystemOverhead {
            global: Some("0.1".into()),
            storage_class: BTreeMap::from([("fast".to_string(), "0.2".to_string())]),
        });
        assert_eq!(config.filesystem_overhead(Some("sc")), "0.1");
        assert_eq!(config.filesystem_overhead(Some("fast")), "0.2");

        config.status = Some(CDIConfigStatus {
            filesystem_overhead: Some(FilesystemOverhead {
                global: Some("0.3".into()),
                storage_class: BTreeMap::new(),
            }),
            ..Default::default()
        });
        assert_eq!(config.filesystem_overhead(Some("fast")), "0.3");
    }

    #[test]
    fn test_preallocation_default_from_status() {
        let mut config = CDIConfig::new("config", CDIConfigSpec::default());
        assert!(!config.preallocation());

        config.status = Some(CDIConfigStatus {
            preallocation: Some(true),
            ..Default::default()
        });
        assert!(config.preallocation());
    }

    #[test]
    fn test_feature_gates() {
        let config = CDIConfig::new(
            "config",
            CDIConfigSpec {
                feature_gates: vec!["HonorWaitForFirstConsumer".into()],
                ..Default::default()
            },
        );
        assert!(config.feature_gate_enabled("HonorWaitForFirstConsumer"));
        assert!(!config.feature_gate_enabled("Other"));
    }
}
