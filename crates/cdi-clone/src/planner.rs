//! 克隆策略规划
//!
//! [`Planner`] 根据目标 PVC、VolumeCloneSource 与集群存储能力选择克隆策略，
//! 再把策略展开成按顺序执行的阶段列表。规划结果不落盘，每次协调都重新生成，
//! 阶段本身负责从集群状态判断自己是否已经完成。

use std::sync::Arc;

use async_trait::async_trait;
use cdi_common::consts::{
    prime_claim_name, temp_snapshot_name, temp_source_claim_name, ANN_CONTENT_TYPE, ANN_PERMISSIVE_CLONE,
    LABEL_OWNED_BY_UID, REASON_CLONE_VALIDATION_FAILED, REASON_CLONE_WITHOUT_SOURCE, REASON_INCOMPATIBLE_PVC,
    REASON_INCOMPATIBLE_VOLUME_MODES, REASON_NO_VOLUME_EXPANSION, REASON_NO_VOLUME_SNAPSHOT_CLASS,
};
use cdi_common::quantity::{parse_overhead, parse_quantity, quantity_from_bytes, required_space};
use cdi_common::{CloneSourceKind, CloneStrategy, ContentType, Error, Result, VolumeCloneSource, VolumeSnapshot};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info, warn};

use crate::capability::ClaimCapabilities;
use crate::events::CloneEvent;
use crate::phase::{
    CsiClonePhase, HostClonePhase, Phase, PhaseContext, PrepClaimPhase, PrepPodConfig, RebindPhase,
    SnapshotClonePhase, SnapshotPhase,
};
use crate::progress::ProgressSource;
use crate::utils::{
    annotation, has_annotation, is_bound, label_selector, namespaced_name, object_reference, same_volume_mode,
    set_annotation, set_storage_request, storage_capacity_bytes, storage_class_name, storage_request,
    storage_request_bytes, uid_of, volume_mode, VolumeMode,
};

const MESSAGE_CLONE_VALIDATION_FAILED: &str = "The clone doesn't meet the validation requirements";
const MESSAGE_NO_VOLUME_SNAPSHOT_CLASS: &str = "No compatible volumesnapshotclass found";
const MESSAGE_INCOMPATIBLE_VOLUME_MODES: &str = "The volume modes of source and target are incompatible";
const MESSAGE_NO_VOLUME_EXPANSION: &str = "No volume expansion is possible";

/// 规划接口，populator 通过它选择策略、生成阶段并回收临时对象
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ClonePlanner: Send + Sync {
    /// 选择克隆策略，`Ok(None)` 表示条件尚不具备，稍后重试
    async fn choose_strategy(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
    ) -> Result<Option<CloneStrategy>>;

    /// 把策略展开为有序的阶段列表
    async fn plan(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
        strategy: CloneStrategy,
    ) -> Result<Vec<Box<dyn Phase>>>;

    /// 删除带有目标 PVC 归属标签的临时对象，返回删除前是否已无残留
    async fn cleanup(&self, owner: &PersistentVolumeClaim) -> Result<bool>;
}

/// 默认规划器
pub struct Planner {
    ctx: PhaseContext,
    progress: Arc<dyn ProgressSource>,
    prep: PrepPodConfig,
}

impl Planner {
    pub fn new(ctx: PhaseContext, progress: Arc<dyn ProgressSource>, prep: PrepPodConfig) -> Self {
        Self { ctx, progress, prep }
    }

    async fn warn(&self, target: &PersistentVolumeClaim, reason: &str, message: impl Into<String>) {
        self.ctx
            .recorder
            .record(&object_reference(target), CloneEvent::warning(reason, message))
            .await;
    }

    /// 目标 PVC 的存储能力，StorageClass 名称未设置时返回 `None`
    async fn target_capabilities(&self, target: &PersistentVolumeClaim) -> Result<Option<ClaimCapabilities>> {
        match self.ctx.resolver().resolve_claim_capabilities(target).await? {
            Some(caps) => Ok(Some(caps)),
            None if storage_class_name(target).is_some() => {
                Err(Error::precondition("target storage class not found"))
            }
            None => Ok(None),
        }
    }

    /// 克隆源未指定时使用 CDIConfig 状态中的集群默认值
    async fn preallocation(&self, source: &VolumeCloneSource) -> Result<bool> {
        if let Some(requested) = source.spec.preallocation {
            return Ok(requested);
        }
        Ok(self
            .ctx
            .client
            .get_cdi_config()
            .await?
            .map_or(false, |config| config.preallocation()))
    }

    async fn strategy_for_claim(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
        caps: &ClaimCapabilities,
    ) -> Result<Option<CloneStrategy>> {
        let namespace = target.metadata.namespace.as_deref().unwrap_or_default();
        let source_name = &source.spec.source.name;

        let Some(source_claim) = self.ctx.client.get_pvc(namespace, source_name).await? else {
            info!("{} 的源 PVC {} 不存在", namespaced_name(target), source_name);
            self.warn(
                target,
                REASON_CLONE_WITHOUT_SOURCE,
                format!("The source pvc {source_name} doesn't exist"),
            )
            .await;
            return Ok(None);
        };
        if !is_bound(&source_claim) {
            debug!("源 PVC {} 尚未绑定", namespaced_name(&source_claim));
            return Ok(None);
        }

        if !has_annotation(target, ANN_PERMISSIVE_CLONE) {
            self.validate_source_size(target, &source_claim).await?;
        }
        validate_content_type(&source_claim, source)?;

        let mut strategy = CloneStrategy::Snapshot;
        let overridden = self
            .ctx
            .client
            .get_cdi_config()
            .await?
            .and_then(|c| c.spec.clone_strategy_override);
        if let Some(strategy_override) = overridden {
            debug!("使用全局克隆策略覆盖 {}", strategy_override);
            strategy = strategy_override;
        } else if let Some(hint) = caps.clone_strategy {
            strategy = hint;
        }

        if strategy == CloneStrategy::Snapshot
            && self
                .ctx
                .resolver()
                .compatible_snapshot_class(&source_claim, target)
                .await?
                .is_none()
        {
            self.warn(target, REASON_NO_VOLUME_SNAPSHOT_CLASS, MESSAGE_NO_VOLUME_SNAPSHOT_CLASS)
                .await;
            strategy = CloneStrategy::HostAssisted;
        }

        if matches!(strategy, CloneStrategy::Snapshot | CloneStrategy::CsiClone)
            && !self.advanced_clone_possible(target, &source_claim, caps).await?
        {
            strategy = CloneStrategy::HostAssisted;
        }

        info!("{} 选择克隆策略 {}", namespaced_name(target), strategy);
        Ok(Some(strategy))
    }

    /// 目标请求不能小于源 PVC 的容量，容量未知时与源请求比较
    async fn validate_source_size(
        &self,
        target: &PersistentVolumeClaim,
        source_claim: &PersistentVolumeClaim,
    ) -> Result<()> {
        let source_size = match storage_capacity_bytes(source_claim)? {
            Some(size) => Some(size),
            None => storage_request_bytes(source_claim)?,
        };
        let (Some(source_size), Some(target_size)) = (source_size, storage_request_bytes(target)?) else {
            return Err(Error::validation("source/target size info missing"));
        };
        if target_size >= source_size {
            return Ok(());
        }

        let err = Error::validation("target resources requests storage size is smaller than the source");
        self.warn(target, REASON_INCOMPATIBLE_PVC, err.to_string()).await;
        self.warn(target, REASON_CLONE_VALIDATION_FAILED, MESSAGE_CLONE_VALIDATION_FAILED)
            .await;
        Err(err)
    }

    /// snapshot 与 csi-clone 要求卷模式一致，且目标更大时 StorageClass 允许扩容
    async fn advanced_clone_possible(
        &self,
        target: &PersistentVolumeClaim,
        source_claim: &PersistentVolumeClaim,
        caps: &ClaimCapabilities,
    ) -> Result<bool> {
        if !same_volume_mode(target, &[source_claim]) {
            self.warn(target, REASON_INCOMPATIBLE_VOLUME_MODES, MESSAGE_INCOMPATIBLE_VOLUME_MODES)
                .await;
            return Ok(false);
        }

        let (Some(capacity), Some(request)) = (storage_capacity_bytes(source_claim)?, storage_request_bytes(target)?)
        else {
            return Err(Error::precondition("source/target size info missing"));
        };
        if capacity < request && !caps.allow_expansion {
            self.warn(target, REASON_NO_VOLUME_EXPANSION, MESSAGE_NO_VOLUME_EXPANSION)
                .await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn strategy_for_snapshot(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
        caps: &ClaimCapabilities,
    ) -> Result<Option<CloneStrategy>> {
        let namespace = target.metadata.namespace.as_deref().unwrap_or_default();
        let snapshot_name = &source.spec.source.name;

        let Some(snapshot) = self.ctx.client.get_volume_snapshot(namespace, snapshot_name).await? else {
            info!("{} 的源快照 {} 不存在", namespaced_name(target), snapshot_name);
            self.warn(
                target,
                REASON_CLONE_WITHOUT_SOURCE,
                format!("The source snapshot {snapshot_name} doesn't exist"),
            )
            .await;
            return Ok(None);
        };

        let Some(content_name) = snapshot.bound_content_name() else {
            debug!("快照 {} 尚未绑定 VolumeSnapshotContent", namespaced_name(&snapshot));
            return Ok(None);
        };
        let Some(content) = self.ctx.client.get_volume_snapshot_content(content_name).await? else {
            return Ok(None);
        };
        if content.spec.driver != caps.provisioner {
            debug!(
                "快照驱动 {} 与目标 provisioner {} 不同，使用 host-assisted",
                content.spec.driver, caps.provisioner
            );
            return Ok(Some(CloneStrategy::HostAssisted));
        }

        let Some(restore_size) = snapshot.restore_size() else {
            return Ok(None);
        };
        let restore_size = parse_quantity(restore_size)?;
        let target_size = storage_request_bytes(target)?
            .ok_or_else(|| Error::validation("source/target size info missing"))?;

        if restore_size > 0 {
            if target_size < restore_size {
                let err = Error::validation("target resources requests storage size is smaller than the source");
                self.warn(target, REASON_CLONE_VALIDATION_FAILED, MESSAGE_CLONE_VALIDATION_FAILED)
                    .await;
                return Err(err);
            }
            if target_size > restore_size && !caps.allow_expansion {
                self.warn(target, REASON_NO_VOLUME_EXPANSION, MESSAGE_NO_VOLUME_EXPANSION)
                    .await;
                return Ok(Some(CloneStrategy::HostAssisted));
            }
        }
        Ok(Some(CloneStrategy::Snapshot))
    }

    fn rebind(&self, desired: &PersistentVolumeClaim, target: &PersistentVolumeClaim) -> Box<dyn Phase> {
        Box::new(RebindPhase {
            ctx: self.ctx.clone(),
            source_namespace: desired.metadata.namespace.clone().unwrap_or_default(),
            source_name: desired.metadata.name.clone().unwrap_or_default(),
            target_namespace: target.metadata.namespace.clone().unwrap_or_default(),
            target_name: target.metadata.name.clone().unwrap_or_default(),
        })
    }

    fn prep_claim(&self, desired: &PersistentVolumeClaim, target: &PersistentVolumeClaim) -> Box<dyn Phase> {
        Box::new(PrepClaimPhase {
            ctx: self.ctx.clone(),
            owner: target.clone(),
            desired_claim: desired.clone(),
            prep: self.prep.clone(),
        })
    }

    async fn host_clone(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
        source_name: &str,
        desired: &PersistentVolumeClaim,
    ) -> Result<Box<dyn Phase>> {
        let preallocation = self.preallocation(source).await?;
        Ok(Box::new(HostClonePhase {
            ctx: self.ctx.clone(),
            owner: target.clone(),
            namespace: target.metadata.namespace.clone().unwrap_or_default(),
            source_name: source_name.to_string(),
            desired_claim: desired.clone(),
            immediate_bind: true,
            preallocation,
            priority_class_name: source.spec.priority_class_name.clone(),
            progress_source: self.progress.clone(),
        }))
    }

    /// kubevirt 内容写入文件系统卷时，按文件系统开销放大期望大小
    async fn inflate_for_overhead(
        &self,
        desired: &mut PersistentVolumeClaim,
        source: &VolumeCloneSource,
        source_size: Option<i64>,
    ) -> Result<()> {
        if source.spec.content_type() != ContentType::Kubevirt || volume_mode(desired) != VolumeMode::Filesystem {
            return Ok(());
        }
        let Some(requested) = storage_request_bytes(desired)? else {
            return Ok(());
        };
        let config = self.ctx.client.get_cdi_config().await?;
        let overhead = match config.as_ref() {
            Some(config) => config.filesystem_overhead(storage_class_name(desired)),
            None => cdi_common::consts::DEFAULT_FS_OVERHEAD,
        };
        let overhead = parse_overhead(overhead)?;

        let inflated = required_space(overhead, source_size.unwrap_or(requested)).max(requested);
        if inflated != requested {
            debug!(
                "{} 的期望大小按文件系统开销 {} 放大到 {} 字节",
                namespaced_name(desired),
                overhead,
                inflated
            );
            set_storage_request(desired, quantity_from_bytes(inflated));
        }
        Ok(())
    }

    async fn host_assisted_from_claim(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
    ) -> Result<Vec<Box<dyn Phase>>> {
        let namespace = target.metadata.namespace.as_deref().unwrap_or_default();
        let source_name = &source.spec.source.name;
        let source_size = match self.ctx.client.get_pvc(namespace, source_name).await? {
            Some(claim) => match storage_capacity_bytes(&claim)? {
                Some(size) => Some(size),
                None => storage_request_bytes(&claim)?,
            },
            None => None,
        };

        let mut desired = desired_claim(target, source)?;
        self.inflate_for_overhead(&mut desired, source, source_size).await?;

        Ok(vec![
            self.host_clone(target, source, source_name, &desired).await?,
            self.rebind(&desired, target),
        ])
    }

    async fn snapshot_from_claim(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
    ) -> Result<Vec<Box<dyn Phase>>> {
        let namespace = target.metadata.namespace.as_deref().unwrap_or_default();
        let source_name = &source.spec.source.name;
        let source_claim = self
            .ctx
            .client
            .get_pvc(namespace, source_name)
            .await?
            .ok_or_else(|| Error::precondition("source claim does not exist"))?;
        let snapshot_class = self
            .ctx
            .resolver()
            .compatible_snapshot_class(&source_claim, target)
            .await?
            .ok_or_else(|| Error::precondition("no compatible volumesnapshotclass"))?;

        let desired = desired_claim(target, source)?;
        let snapshot_name = temp_snapshot_name(&uid_of(target)?);

        Ok(vec![
            Box::new(SnapshotPhase {
                ctx: self.ctx.clone(),
                owner: target.clone(),
                source_namespace: namespace.to_string(),
                source_name: source_name.clone(),
                target_name: snapshot_name.clone(),
                snapshot_class,
            }),
            Box::new(SnapshotClonePhase {
                ctx: self.ctx.clone(),
                owner: target.clone(),
                namespace: namespace.to_string(),
                source_name: snapshot_name,
                desired_claim: desired.clone(),
            }),
            self.prep_claim(&desired, target),
            self.rebind(&desired, target),
        ])
    }

    fn csi_clone(&self, target: &PersistentVolumeClaim, source: &VolumeCloneSource) -> Result<Vec<Box<dyn Phase>>> {
        let desired = desired_claim(target, source)?;
        Ok(vec![
            Box::new(CsiClonePhase {
                ctx: self.ctx.clone(),
                owner: target.clone(),
                namespace: target.metadata.namespace.clone().unwrap_or_default(),
                source_name: source.spec.source.name.clone(),
                desired_claim: desired.clone(),
            }),
            self.prep_claim(&desired, target),
            self.rebind(&desired, target),
        ])
    }

    fn snapshot_restore(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
    ) -> Result<Vec<Box<dyn Phase>>> {
        let desired = desired_claim(target, source)?;
        Ok(vec![
            Box::new(SnapshotClonePhase {
                ctx: self.ctx.clone(),
                owner: target.clone(),
                namespace: target.metadata.namespace.clone().unwrap_or_default(),
                source_name: source.spec.source.name.clone(),
                desired_claim: desired.clone(),
            }),
            self.prep_claim(&desired, target),
            self.rebind(&desired, target),
        ])
    }

    /// 快照驱动与目标不兼容时，先恢复到临时源 PVC，再由工作 Pod 复制
    async fn host_assisted_from_snapshot(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
    ) -> Result<Vec<Box<dyn Phase>>> {
        let namespace = target.metadata.namespace.as_deref().unwrap_or_default();
        let snapshot = self
            .ctx
            .client
            .get_volume_snapshot(namespace, &source.spec.source.name)
            .await?
            .ok_or_else(|| Error::precondition("source snapshot does not exist"))?;

        let temp_source = self.temp_source_claim(target, &snapshot).await?;
        let temp_name = temp_source.metadata.name.clone().unwrap_or_default();

        let mut desired = desired_claim(target, source)?;
        let source_size = storage_request_bytes(&temp_source)?;
        self.inflate_for_overhead(&mut desired, source, source_size).await?;

        Ok(vec![
            Box::new(SnapshotClonePhase {
                ctx: self.ctx.clone(),
                owner: target.clone(),
                namespace: namespace.to_string(),
                source_name: source.spec.source.name.clone(),
                desired_claim: temp_source.clone(),
            }),
            self.prep_claim(&temp_source, target),
            self.host_clone(target, source, &temp_name, &desired).await?,
            self.rebind(&desired, target),
        ])
    }

    /// 从快照恢复的临时源 PVC
    ///
    /// StorageClass 取 provisioner 等于快照驱动的第一个（按名称排序）；
    /// restoreSize 为零时使用目标的请求大小。
    async fn temp_source_claim(
        &self,
        target: &PersistentVolumeClaim,
        snapshot: &VolumeSnapshot,
    ) -> Result<PersistentVolumeClaim> {
        let content_name = snapshot
            .bound_content_name()
            .ok_or_else(|| Error::precondition("volumeSnapshotContent name not found"))?;
        let content = self
            .ctx
            .client
            .get_volume_snapshot_content(content_name)
            .await?
            .ok_or_else(|| Error::not_found(format!("VolumeSnapshotContent {content_name}")))?;

        let mut candidates: Vec<String> = self
            .ctx
            .client
            .list_storage_classes()
            .await?
            .into_iter()
            .filter(|sc| sc.provisioner == content.spec.driver)
            .filter_map(|sc| sc.metadata.name)
            .collect();
        candidates.sort();
        let sc_name = candidates.into_iter().next().ok_or_else(|| {
            Error::precondition("unable to find a valid storage class for the temporal source claim")
        })?;

        let restore_size = snapshot
            .restore_size()
            .ok_or_else(|| Error::precondition("snapshot has no RestoreSize"))?;
        let size = if parse_quantity(restore_size)? == 0 {
            storage_request(target)
                .cloned()
                .ok_or_else(|| Error::validation("source/target size info missing"))?
        } else {
            restore_size.clone()
        };

        let mut claim = claim_template(target, temp_source_claim_name(&uid_of(target)?))?;
        if let Some(spec) = claim.spec.as_mut() {
            spec.storage_class_name = Some(sc_name);
        }
        set_storage_request(&mut claim, size);
        Ok(claim)
    }
}

#[async_trait]
impl ClonePlanner for Planner {
    async fn choose_strategy(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
    ) -> Result<Option<CloneStrategy>> {
        let kind = CloneSourceKind::of(&source.spec.source)
            .ok_or_else(|| Error::validation("unsupported datasource"))?;

        let Some(caps) = self.target_capabilities(target).await? else {
            debug!("{} 未设置 StorageClass", namespaced_name(target));
            return Ok(None);
        };

        match kind {
            CloneSourceKind::PersistentVolumeClaim => self.strategy_for_claim(target, source, &caps).await,
            CloneSourceKind::VolumeSnapshot => self.strategy_for_snapshot(target, source, &caps).await,
        }
    }

    async fn plan(
        &self,
        target: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
        strategy: CloneStrategy,
    ) -> Result<Vec<Box<dyn Phase>>> {
        let kind = CloneSourceKind::of(&source.spec.source);
        match (kind, strategy) {
            (Some(CloneSourceKind::PersistentVolumeClaim), CloneStrategy::HostAssisted) => {
                self.host_assisted_from_claim(target, source).await
            }
            (Some(CloneSourceKind::PersistentVolumeClaim), CloneStrategy::Snapshot) => {
                self.snapshot_from_claim(target, source).await
            }
            (Some(CloneSourceKind::PersistentVolumeClaim), CloneStrategy::CsiClone) => self.csi_clone(target, source),
            (Some(CloneSourceKind::VolumeSnapshot), CloneStrategy::Snapshot) => self.snapshot_restore(target, source),
            (Some(CloneSourceKind::VolumeSnapshot), CloneStrategy::HostAssisted) => {
                self.host_assisted_from_snapshot(target, source).await
            }
            _ => Err(Error::validation(format!(
                "unknown strategy/source {}/{}",
                strategy, source.spec.source.kind
            ))),
        }
    }

    async fn cleanup(&self, owner: &PersistentVolumeClaim) -> Result<bool> {
        let namespace = owner.metadata.namespace.as_deref().unwrap_or_default();
        let selector = label_selector(LABEL_OWNED_BY_UID, &uid_of(owner)?);
        let mut remaining = 0;

        for claim in self.ctx.client.list_pvcs(namespace, &selector).await? {
            remaining += 1;
            if let Some(name) = claim.metadata.name.as_deref() {
                self.ctx.client.delete_pvc(namespace, name).await?;
            }
        }
        for pod in self.ctx.client.list_pods(namespace, &selector).await? {
            remaining += 1;
            if let Some(name) = pod.metadata.name.as_deref() {
                self.ctx.client.delete_pod(namespace, name).await?;
            }
        }
        for snapshot in self.ctx.client.list_volume_snapshots(namespace, &selector).await? {
            remaining += 1;
            if let Some(name) = snapshot.metadata.name.as_deref() {
                self.ctx.client.delete_volume_snapshot(namespace, name).await?;
            }
        }

        if remaining > 0 {
            warn!("{} 仍有 {} 个临时对象待删除", namespaced_name(owner), remaining);
        }
        Ok(remaining == 0)
    }
}

/// 源 PVC 与目标声明的内容类型必须一致
fn validate_content_type(source_claim: &PersistentVolumeClaim, source: &VolumeCloneSource) -> Result<()> {
    let source_type = ContentType::from_annotation(annotation(source_claim, ANN_CONTENT_TYPE))?;
    let target_type = source.spec.content_type();
    if source_type != target_type {
        return Err(Error::validation(format!(
            "source contentType ({source_type}) and target contentType ({target_type}) do not match"
        )));
    }
    Ok(())
}

/// 复制目标 PVC 的标签、注解与规范，清除数据源
fn claim_template(target: &PersistentVolumeClaim, name: String) -> Result<PersistentVolumeClaim> {
    let mut spec = target
        .spec
        .clone()
        .ok_or_else(|| Error::validation("target claim has no spec"))?;
    spec.data_source = None;
    spec.data_source_ref = None;
    spec.volume_name = None;

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: target.metadata.namespace.clone(),
            labels: target.metadata.labels.clone(),
            annotations: target.metadata.annotations.clone(),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}

/// 中间 PVC 的期望形态
pub fn desired_claim(target: &PersistentVolumeClaim, source: &VolumeCloneSource) -> Result<PersistentVolumeClaim> {
    let mut claim = claim_template(target, prime_claim_name(&uid_of(target)?))?;
    set_annotation(&mut claim.metadata, ANN_CONTENT_TYPE, source.spec.content_type().as_str());
    Ok(claim)
}
