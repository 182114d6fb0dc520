//! VolumeCloneSource 自定义资源
//!
//! 目标 PVC 通过 `dataSourceRef` 引用 VolumeCloneSource，由它指明真正的克隆源
//! （PVC 或 VolumeSnapshot）以及内容类型、预分配等参数。

use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// 克隆源规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "cdi.kubevirt.io", version = "v1beta1", kind = "VolumeCloneSource", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCloneSourceSpec {
    /// 克隆源，kind 为 PersistentVolumeClaim 或 VolumeSnapshot
    pub source: TypedLocalObjectReference,

    /// 内容类型，默认 kubevirt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,

    /// 是否请求预分配，未设置时使用 CDIConfig 的集群默认值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preallocation: Option<bool>,

    /// 工作 Pod 使用的优先级类
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

impl VolumeCloneSourceSpec {
    /// 生效的内容类型
    pub fn content_type(&self) -> ContentType {
        self.content_type.unwrap_or_default()
    }
}

/// 克隆源的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneSourceKind {
    PersistentVolumeClaim,
    VolumeSnapshot,
}

impl CloneSourceKind {
    /// 解析 `spec.source`，不支持的种类返回 `None`
    pub fn of(source: &TypedLocalObjectReference) -> Option<Self> {
        let group = source.api_group.as_deref().unwrap_or_default();
        match (group, source.kind.as_str()) {
            ("", "PersistentVolumeClaim") => Some(CloneSourceKind::PersistentVolumeClaim),
            ("snapshot.storage.k8s.io", "VolumeSnapshot") => Some(CloneSourceKind::VolumeSnapshot),
            _ => None,
        }
    }
}

/// 数据内容类型
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// 虚拟机磁盘镜像
    #[default]
    Kubevirt,
    /// 归档内容
    Archive,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Kubevirt => "kubevirt",
            ContentType::Archive => "archive",
        }
    }

    /// 从注解值解析，空值视为 kubevirt
    pub fn from_annotation(value: Option<&str>) -> Result<Self, Error> {
        match value {
            None | Some("") => Ok(ContentType::Kubevirt),
            Some(v) => v.parse(),
        }
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubevirt" => Ok(ContentType::Kubevirt),
            "archive" => Ok(ContentType::Archive),
            other => Err(Error::validation(format!("unknown content type {other:?}"))),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 克隆策略
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum CloneStrategy {
    /// 由工作 Pod 复制数据
    #[serde(rename = "copy")]
    HostAssisted,
    /// 创建快照后恢复
    #[serde(rename = "snapshot")]
    Snapshot,
    /// CSI 驱动原生克隆
    #[serde(rename = "csi-clone")]
    CsiClone,
}

impl CloneStrategy {
    /// 持久化到 `cloneType` 注解的值
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneStrategy::HostAssisted => "copy",
            CloneStrategy::Snapshot => "snapshot",
            CloneStrategy::CsiClone => "csi-clone",
        }
    }
}

impl FromStr for CloneStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copy" => Ok(CloneStrategy::HostAssisted),
            "snapshot" => Ok(CloneStrategy::Snapshot),
            "csi-clone" => Ok(CloneStrategy::CsiClone),
            other => Err(Error::validation(format!("unknown clone strategy {other:?}"))),
        }
    }
}

impl fmt::Display for CloneStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_round_trips_through_annotation_value() {
        for s in [CloneStrategy::HostAssisted, CloneStrategy::Snapshot, CloneStrategy::CsiClone] {
            assert_eq!(s.as_str().parse::<CloneStrategy>().unwrap(), s);
        }
        assert!("smart".parse::<CloneStrategy>().is_err());
    }

    #[test]
    fn test_spec_deserializes_from_yaml() {
        let yaml = r#"
source:
  kind: PersistentVolumeClaim
  name: source
contentType: archive
preallocation: true
"#;
        let spec: VolumeCloneSourceSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.content_type(), ContentType::Archive);
        assert_eq!(spec.preallocation, Some(true));
        assert_eq!(
            CloneSourceKind::of(&spec.source),
            Some(CloneSourceKind::PersistentVolumeClaim)
        );
    }

    #[test]
    fn test_source_kind_requires_matching_group() {
        let snap = TypedLocalObjectReference {
            api_group: Some("snapshot.storage.k8s.io".into()),
            kind: "VolumeSnapshot".into(),
            name: "s".into(),
        };
        assert_eq!(CloneSourceKind::of(&snap), Some(CloneSourceKind::VolumeSnapshot));

        let wrong = TypedLocalObjectReference {
            api_group: None,
            kind: "VolumeSnapshot".into(),
            name: "s".into(),
        };
        assert_eq!(CloneSourceKind::of(&wrong), None);
    }

    #[test]
    fn test_content_type_from_annotation_defaults_to_kubevirt() {
        assert_eq!(ContentType::from_annotation(None).unwrap(), ContentType::Kubevirt);
        assert_eq!(ContentType::from_annotation(Some("archive")).unwrap(), ContentType::Archive);
        assert!(ContentType::from_annotation(Some("iso")).is_err());
    }
}
