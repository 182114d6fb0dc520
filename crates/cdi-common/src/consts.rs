//! 注解、标签与命名常量
//!
//! 克隆流程的全部持久化状态都以注解和标签的形式保存在集群对象上，
//! 这里集中定义这些键名以及中间资源的命名规则。

/// CDI API 组
pub const API_GROUP: &str = "cdi.kubevirt.io";

/// VolumeCloneSource 资源类型名
pub const VOLUME_CLONE_SOURCE_KIND: &str = "VolumeCloneSource";

/// 卷快照 API 组
pub const SNAPSHOT_API_GROUP: &str = "snapshot.storage.k8s.io";

// ---- 目标 PVC 上的克隆状态注解 ----

/// 当前克隆阶段：Pending、阶段名、Succeeded 或 Error
pub const ANN_CLONE_PHASE: &str = "cdi.kubevirt.io/clonePhase";
/// 克隆失败原因
pub const ANN_CLONE_ERROR: &str = "cdi.kubevirt.io/cloneError";
/// 已选定的克隆策略，一经写入不再重新计算
pub const ANN_CLONE_TYPE: &str = "cdi.kubevirt.io/cloneType";
/// 填充进度，格式为 `"%.2f%%"`
pub const ANN_POPULATOR_PROGRESS: &str = "cdi.kubevirt.io/storage.populator.progress";
/// 跳过源/目标大小校验
pub const ANN_PERMISSIVE_CLONE: &str = "cdi.kubevirt.io/permissiveClone";

/// DataVolume 读取的 Running 条件
pub const ANN_RUNNING_CONDITION: &str = "cdi.kubevirt.io/storage.condition.running";
pub const ANN_RUNNING_CONDITION_MESSAGE: &str = "cdi.kubevirt.io/storage.condition.running.message";
pub const ANN_RUNNING_CONDITION_REASON: &str = "cdi.kubevirt.io/storage.condition.running.reason";

/// 拥有目标 PVC 的 DataVolume 资源类型名
pub const DATA_VOLUME_KIND: &str = "DataVolume";

/// 克隆填充器 finalizer
pub const CLONE_POPULATOR_FINALIZER: &str = "cdi.kubevirt.io/clonePopulator";

// ---- 中间 PVC 上的工作流注解 ----

pub const ANN_POD_PHASE: &str = "cdi.kubevirt.io/storage.pod.phase";
pub const ANN_POD_RESTARTS: &str = "cdi.kubevirt.io/storage.pod.restarts";
pub const ANN_PREALLOCATION_REQUESTED: &str = "cdi.kubevirt.io/storage.preallocation.requested";
pub const ANN_PREALLOCATION_APPLIED: &str = "cdi.kubevirt.io/storage.preallocation";
pub const ANN_PRIORITY_CLASS_NAME: &str = "cdi.kubevirt.io/storage.pod.priorityclassname";
pub const ANN_CONTENT_TYPE: &str = "cdi.kubevirt.io/storage.contentType";
pub const ANN_OWNER_UID: &str = "cdi.kubevirt.io/ownerUID";
pub const ANN_POPULATOR_KIND: &str = "cdi.kubevirt.io/storage.populator.kind";
pub const ANN_EVENT_SOURCE: &str = "cdi.kubevirt.io/events.source";
pub const ANN_EVENT_SOURCE_KIND: &str = "cdi.kubevirt.io/events.source.kind";
pub const ANN_IMMEDIATE_BINDING: &str = "cdi.kubevirt.io/storage.bind.immediate.requested";
pub const ANN_CLONE_SOURCE_POD: &str = "cdi.kubevirt.io/storage.sourceClonePodName";
pub const ANN_POPULATED_FOR: &str = "cdi.kubevirt.io/storage.populatedFor";
pub const ANN_PRE_POPULATED: &str = "cdi.kubevirt.io/storage.prePopulated";
pub const ANN_CLONE_REQUEST: &str = "k8s.io/CloneRequest";
pub const ANN_CLONE_OF: &str = "k8s.io/CloneOf";
pub const ANN_CREATED_BY: &str = "cdi.kubevirt.io/storage.createdBy";

/// 调度器为 WaitForFirstConsumer PVC 选定的节点
pub const ANN_SELECTED_NODE: &str = "volume.kubernetes.io/selected-node";
/// in-tree 卷插件迁移到 CSI 后由控制面写入
pub const ANN_MIGRATED_TO: &str = "volume.kubernetes.io/migrated-to";

// ---- 标签 ----

/// 中间资源的归属标签，值为目标 PVC 的 UID
pub const LABEL_OWNED_BY_UID: &str = "cdi.kubevirt.io/OwnedByUID";
/// CDI 组件标签
pub const LABEL_CDI_COMPONENT: &str = "cdi.kubevirt.io";
/// 目标 PVC 上组件标签的值
pub const CDI_COMPONENT_VALUE: &str = "cdi";
/// PrepPod 的组件标签值
pub const PREP_POD_COMPONENT_VALUE: &str = "cdi-populator-prep";
pub const LABEL_APP: &str = "app";
pub const APP_VALUE: &str = "containerized-data-importer";
/// 文件系统卷上关闭容量告警
pub const LABEL_FILLING_UP_SUPPRESS: &str = "alerts.k8s.io/KubePersistentVolumeFillingUp";
pub const FILLING_UP_SUPPRESS_VALUE: &str = "disabled";
/// 排除出 Velero 备份
pub const LABEL_EXCLUDE_FROM_VELERO_BACKUP: &str = "velero.io/exclude-from-backup";

// ---- 阶段名 ----

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_SUCCEEDED: &str = "Succeeded";
pub const PHASE_ERROR: &str = "Error";

/// 完成时的进度值
pub const PROGRESS_DONE: &str = "100.0%";

// ---- 事件原因 ----

pub const REASON_CLONE_SOURCE_IN_USE: &str = "CloneSourceInUse";
pub const REASON_EXCEEDED_QUOTA: &str = "ExceededQuota";
pub const REASON_CLONE_VALIDATION_FAILED: &str = "CloneValidationFailed";
pub const REASON_INCOMPATIBLE_PVC: &str = "ErrIncompatiblePVC";
pub const REASON_CLONE_WITHOUT_SOURCE: &str = "CloneWithoutSource";
pub const REASON_NO_VOLUME_SNAPSHOT_CLASS: &str = "NoVolumeSnapshotClass";
pub const REASON_INCOMPATIBLE_VOLUME_MODES: &str = "IncompatibleVolumeModes";
pub const REASON_NO_VOLUME_EXPANSION: &str = "NoVolumeExpansion";
pub const REASON_RESTORE_SIZE_ZERO: &str = "RestoreSizeZero";
pub const REASON_SUCCESSFUL_CLONE: &str = "SuccessfulClone";
pub const REASON_CLONE_FAILED: &str = "CloneFailed";

// ---- PrepPod ----

pub const PREP_CONTAINER_NAME: &str = "dummy";
pub const DATA_VOLUME_NAME: &str = "cdi-data-vol";
pub const CLONER_MOUNT_PATH: &str = "/var/run/cdi/clone/source";
pub const CLONER_DEVICE_PATH: &str = "/dev/cdi-block-volume";
/// 受限安全上下文使用的非 root 用户
pub const QEMU_SUBGID: i64 = 107;

/// 默认文件系统开销比例
pub const DEFAULT_FS_OVERHEAD: &str = "0.055";
/// 卷大小对齐粒度（1MiB）
pub const DEFAULT_ALIGN_BLOCK_SIZE: i64 = 1024 * 1024;

/// CDIConfig 单例名称
pub const CDI_CONFIG_NAME: &str = "config";

/// 目标 PVC UID 对应的中间 PVC 名称
pub fn prime_claim_name(uid: &str) -> String {
    format!("prime-{uid}")
}

/// 快照策略使用的临时快照名称
pub fn temp_snapshot_name(uid: &str) -> String {
    format!("tmp-snapshot-{uid}")
}

/// PrepPod 名称
pub fn prep_pod_name(uid: &str) -> String {
    format!("prep-{uid}")
}

/// 从快照回退到 host-assisted 时使用的临时源 PVC 名称
pub fn temp_source_claim_name(uid: &str) -> String {
    format!("tmp-source-pvc-{uid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediate_names_are_pure_functions_of_uid() {
        assert_eq!(prime_claim_name("T"), "prime-T");
        assert_eq!(temp_snapshot_name("T"), "tmp-snapshot-T");
        assert_eq!(prep_pod_name("T"), "prep-T");
        assert_eq!(temp_source_claim_name("T"), "tmp-source-pvc-T");
    }
}
