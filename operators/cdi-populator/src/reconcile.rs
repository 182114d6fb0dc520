//! 资源协调模块
//!
//! 该模块实现克隆填充器的协调逻辑。目标 PVC 通过 `dataSourceRef` 引用一个
//! VolumeCloneSource，协调器选择克隆策略、初始化目标 PVC、执行规划出的阶段，
//! 并把进度与错误以注解的形式写回目标 PVC。克隆完成或目标被删除后，
//! 协调器回收所有带归属标签的临时对象并移除 finalizer。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cdi_clone::utils::{
    add_finalizer, annotation, controlled_by_kind, has_annotation, has_finalizer, is_bound, is_deleted,
    namespaced_name,
    object_reference, remove_annotation, remove_finalizer, set_annotation, set_label, storage_class_name,
    volume_mode, VolumeMode,
};
use cdi_clone::{
    run_phases, BindingMode, CapabilityResolver, ClonePlanner, CloneEvent, ClusterClient, EventRecorder,
    PhaseProgress, PhaseRun,
};
use cdi_common::consts::{
    ANN_CLONE_ERROR, ANN_CLONE_OF, ANN_CLONE_PHASE, ANN_CLONE_TYPE, ANN_IMMEDIATE_BINDING, ANN_MIGRATED_TO,
    ANN_POD_RESTARTS, ANN_POPULATOR_PROGRESS, ANN_PREALLOCATION_APPLIED, ANN_RUNNING_CONDITION,
    ANN_RUNNING_CONDITION_MESSAGE, ANN_RUNNING_CONDITION_REASON, ANN_SELECTED_NODE, API_GROUP, APP_VALUE,
    CLONE_POPULATOR_FINALIZER, DATA_VOLUME_KIND, FILLING_UP_SUPPRESS_VALUE, LABEL_APP, LABEL_FILLING_UP_SUPPRESS, PHASE_ERROR,
    PHASE_PENDING, PHASE_SUCCEEDED, PROGRESS_DONE, REASON_CLONE_FAILED, REASON_SUCCESSFUL_CLONE,
    VOLUME_CLONE_SOURCE_KIND,
};
use cdi_common::{CloneStrategy, Error, ErrorKind, Result, VolumeCloneSource};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, TypedObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;

/// 暂时无法选择策略时的重试间隔
pub const STRATEGY_RETRY: Duration = Duration::from_secs(5);

const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// in-tree 卷插件的 provisioner 前缀
const IN_TREE_PROVISIONER_PREFIX: &str = "kubernetes.io/";

/// 阶段上报后需要同步到目标 PVC 的注解
const MIRRORED_ANNOTATIONS: &[&str] = &[ANN_PREALLOCATION_APPLIED, ANN_CLONE_OF];

/// 一次协调的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 等待下一次对象变化
    Done,
    /// 在指定间隔后重新协调
    Requeue(Duration),
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Action::await_change(),
            Outcome::Requeue(after) => Action::requeue(after),
        }
    }
}

/// 重新排队间隔
#[derive(Debug, Clone, Copy)]
pub struct RequeueTimings {
    /// 阶段未给出间隔时使用
    pub default: Duration,
    /// 配额等可恢复错误使用
    pub error: Duration,
}

impl Default for RequeueTimings {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(10),
            error: Duration::from_secs(30),
        }
    }
}

/// 目标 PVC 引用的 VolumeCloneSource
pub fn clone_source_ref(pvc: &PersistentVolumeClaim) -> Option<&TypedObjectReference> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.data_source_ref.as_ref())
        .filter(|r| {
            r.api_group.as_deref() == Some(API_GROUP) && r.kind == VOLUME_CLONE_SOURCE_KIND && !r.name.is_empty()
        })
}

/// 是否是由克隆填充器负责的 PVC
pub fn is_clone_target(pvc: &PersistentVolumeClaim) -> bool {
    clone_source_ref(pvc).is_some()
}

/// 为 DataVolume 拥有的目标 PVC 写入 Running 条件注解
///
/// 进行中的阶段若在中间 PVC 上报告了 Running 条件，则原样转发并带上
/// 工作 Pod 的重启次数；否则视为填充器正在运行。
fn add_running_annotations(
    owned_by_data_volume: bool,
    meta: &mut ObjectMeta,
    phase: &str,
    reported: &BTreeMap<String, String>,
) {
    if !owned_by_data_volume {
        return;
    }

    let (running, message, reason) = match phase {
        PHASE_SUCCEEDED => ("false".to_string(), "Clone Complete".to_string(), "Completed".to_string()),
        PHASE_PENDING => ("false".to_string(), "Clone Pending".to_string(), "Pending".to_string()),
        PHASE_ERROR => {
            let message = meta
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANN_CLONE_ERROR))
                .cloned()
                .unwrap_or_default();
            ("false".to_string(), message, "Error".to_string())
        }
        _ => match reported.get(ANN_RUNNING_CONDITION) {
            Some(running) => {
                if let Some(restarts) = reported.get(ANN_POD_RESTARTS) {
                    set_annotation(meta, ANN_POD_RESTARTS, restarts.clone());
                }
                (
                    running.clone(),
                    reported.get(ANN_RUNNING_CONDITION_MESSAGE).cloned().unwrap_or_default(),
                    reported.get(ANN_RUNNING_CONDITION_REASON).cloned().unwrap_or_default(),
                )
            }
            None => ("true".to_string(), String::new(), "Populator is running".to_string()),
        },
    };

    set_annotation(meta, ANN_RUNNING_CONDITION, running);
    set_annotation(meta, ANN_RUNNING_CONDITION_MESSAGE, message);
    set_annotation(meta, ANN_RUNNING_CONDITION_REASON, reason);
}

/// 克隆填充器协调器
pub struct ClonePopulatorReconciler {
    client: Arc<dyn ClusterClient>,
    resolver: CapabilityResolver,
    recorder: Arc<dyn EventRecorder>,
    planner: Arc<dyn ClonePlanner>,
    metrics: Arc<Metrics>,
    timings: RequeueTimings,
    /// 每个目标 PVC 的连续失败次数
    failures: Mutex<HashMap<String, u32>>,
}

impl ClonePopulatorReconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        recorder: Arc<dyn EventRecorder>,
        planner: Arc<dyn ClonePlanner>,
        metrics: Arc<Metrics>,
        timings: RequeueTimings,
    ) -> Self {
        Self {
            resolver: CapabilityResolver::new(client.clone()),
            client,
            recorder,
            planner,
            metrics,
            timings,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// 协调 `namespace/name` 指向的 PVC
    ///
    /// 总是重新读取 PVC，以最新的 resourceVersion 作为写入前提。
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        self.metrics.reconcile_total.inc();
        debug!("协调 PVC {}/{}", namespace, name);

        let pvc = match self.client.get_pvc(namespace, name).await {
            Ok(Some(pvc)) => pvc,
            Ok(None) => {
                debug!("PVC {}/{} 已不存在", namespace, name);
                return Ok(Outcome::Done);
            }
            Err(e) => return Err(self.counted(e)),
        };

        if !is_clone_target(&pvc) {
            return Ok(Outcome::Done);
        }

        let succeeded = annotation(&pvc, ANN_CLONE_PHASE) == Some(PHASE_SUCCEEDED);
        let outcome = if !is_deleted(&pvc) && !succeeded {
            self.reconcile_pending(&pvc, is_bound(&pvc)).await?
        } else if has_finalizer(&pvc, CLONE_POPULATOR_FINALIZER) {
            self.reconcile_done(&pvc).await?
        } else {
            Outcome::Done
        };

        self.reset_backoff(&format!("{namespace}/{name}"));
        Ok(outcome)
    }

    /// 协调失败后的重新排队策略
    ///
    /// 按目标 PVC 指数退避；完整性错误需要人工介入，只等待对象变化。
    pub fn handle_error(&self, pvc: &PersistentVolumeClaim, error: &Error) -> Action {
        let key = namespaced_name(pvc);
        match self.next_backoff(&key, error.kind()) {
            Some(delay) => {
                warn!("协调 PVC {} 失败，{:?} 后重试: {}", key, delay, error);
                Action::requeue(delay)
            }
            None => {
                error!("PVC {} 完整性错误，等待人工处理: {}", key, error);
                Action::await_change()
            }
        }
    }

    fn next_backoff(&self, key: &str, kind: ErrorKind) -> Option<Duration> {
        if kind == ErrorKind::Integrity {
            return None;
        }
        let mut failures = self.failures();
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = BACKOFF_BASE
            .checked_mul(2u32.saturating_pow(*count))
            .map_or(BACKOFF_MAX, |d| d.min(BACKOFF_MAX));
        *count = count.saturating_add(1);
        Some(delay)
    }

    fn reset_backoff(&self, key: &str) {
        self.failures().remove(key);
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn counted(&self, err: Error) -> Error {
        self.metrics.record_error(err.kind().as_str());
        err
    }

    async fn reconcile_pending(&self, pvc: &PersistentVolumeClaim, status_only: bool) -> Result<Outcome> {
        match self.pending_steps(pvc, status_only).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.handle_pending_error(pvc, err).await,
        }
    }

    async fn pending_steps(&self, pvc: &PersistentVolumeClaim, status_only: bool) -> Result<Outcome> {
        if !self.claim_ready_for_population(pvc).await? {
            debug!("PVC {} 尚不满足填充条件", namespaced_name(pvc));
            self.update_clone_phase(pvc, PHASE_PENDING, &[]).await?;
            return Ok(Outcome::Done);
        }

        let namespace = pvc.metadata.namespace.as_deref().unwrap_or_default();
        let Some(source_ref) = clone_source_ref(pvc) else {
            return Ok(Outcome::Done);
        };
        if source_ref
            .namespace
            .as_deref()
            .map_or(false, |ns| !ns.is_empty() && ns != namespace)
        {
            return Err(Error::validation("cross namespace datasource not supported"));
        }

        let Some(source) = self.client.get_volume_clone_source(namespace, &source_ref.name).await? else {
            debug!("VolumeCloneSource {}/{} 不存在", namespace, source_ref.name);
            self.update_clone_phase(pvc, PHASE_PENDING, &[]).await?;
            return Ok(Outcome::Done);
        };

        let Some(strategy) = self.clone_strategy(pvc, &source).await? else {
            debug!("暂时无法为 {} 选择克隆策略", namespaced_name(pvc));
            self.update_clone_phase(pvc, PHASE_PENDING, &[]).await?;
            return Ok(Outcome::Requeue(STRATEGY_RETRY));
        };

        if self.init_target_claim(pvc, strategy).await? {
            // 更新本身会触发下一次协调
            debug!("已初始化目标 PVC {}", namespaced_name(pvc));
            return Ok(Outcome::Done);
        }

        self.plan_and_execute(pvc, &source, strategy, status_only).await
    }

    /// 目标 PVC 是否可以开始填充
    ///
    /// 未指定 StorageClass 时等待默认类被写入；WaitForFirstConsumer 的 PVC
    /// 需要调度器选定节点，或显式请求立即绑定。
    async fn claim_ready_for_population(&self, pvc: &PersistentVolumeClaim) -> Result<bool> {
        let Some(class_name) = storage_class_name(pvc) else {
            return Ok(false);
        };
        if class_name.is_empty() {
            return Err(Error::precondition(format!(
                "PVC {} has empty storage class name",
                namespaced_name(pvc)
            )));
        }
        let caps = self
            .resolver
            .resolve_claim_capabilities(pvc)
            .await?
            .ok_or_else(|| Error::precondition(format!("storage class {class_name} not found")))?;

        if caps.provisioner.starts_with(IN_TREE_PROVISIONER_PREFIX) && !has_annotation(pvc, ANN_MIGRATED_TO) {
            return Err(Error::precondition(format!(
                "can't use populator for PVC {} with in-tree storage class {}",
                namespaced_name(pvc),
                caps.provisioner
            )));
        }

        if caps.binding_mode == BindingMode::WaitForFirstConsumer
            && !has_annotation(pvc, ANN_SELECTED_NODE)
            && !has_annotation(pvc, ANN_IMMEDIATE_BINDING)
        {
            return Ok(false);
        }
        Ok(true)
    }

    /// 已保存的策略优先，否则交给规划器选择
    async fn clone_strategy(
        &self,
        pvc: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
    ) -> Result<Option<CloneStrategy>> {
        match annotation(pvc, ANN_CLONE_TYPE).filter(|s| !s.is_empty()) {
            Some(saved) => saved.parse().map(Some),
            None => self.planner.choose_strategy(pvc, source).await,
        }
    }

    /// 写入标签、策略、初始阶段与 finalizer，返回是否发生了更新
    async fn init_target_claim(&self, pvc: &PersistentVolumeClaim, strategy: CloneStrategy) -> Result<bool> {
        let mut updated = pvc.clone();
        let meta = &mut updated.metadata;
        set_label(meta, LABEL_APP, APP_VALUE);
        if volume_mode(pvc) == VolumeMode::Filesystem {
            set_label(meta, LABEL_FILLING_UP_SUPPRESS, FILLING_UP_SUPPRESS_VALUE);
        }
        set_annotation(meta, ANN_CLONE_TYPE, strategy.as_str());
        if annotation(pvc, ANN_CLONE_PHASE).unwrap_or_default().is_empty() {
            set_annotation(meta, ANN_CLONE_PHASE, PHASE_PENDING);
        }
        add_finalizer(meta, CLONE_POPULATOR_FINALIZER);

        if updated == *pvc {
            return Ok(false);
        }
        self.client.replace_pvc(&updated).await?;
        info!("目标 PVC {} 使用 {} 策略克隆", namespaced_name(pvc), strategy);
        Ok(true)
    }

    async fn plan_and_execute(
        &self,
        pvc: &PersistentVolumeClaim,
        source: &VolumeCloneSource,
        strategy: CloneStrategy,
        status_only: bool,
    ) -> Result<Outcome> {
        let phases = self.planner.plan(pvc, source, strategy).await?;
        debug!("为 {} 规划了 {} 个阶段", namespaced_name(pvc), phases.len());

        match run_phases(&phases, status_only).await {
            Ok(PhaseRun::InProgress {
                phase,
                requeue,
                statuses,
            }) => {
                self.update_clone_phase(pvc, phase, &statuses).await?;
                let after = if requeue.is_default() {
                    self.timings.default
                } else {
                    requeue.after
                };
                Ok(Outcome::Requeue(after))
            }
            Ok(PhaseRun::Completed { mut statuses }) => {
                match statuses.last_mut() {
                    Some(last) => last.progress = PROGRESS_DONE.to_string(),
                    None => statuses.push(PhaseProgress {
                        progress: PROGRESS_DONE.to_string(),
                        ..Default::default()
                    }),
                }
                self.update_clone_phase(pvc, PHASE_SUCCEEDED, &statuses).await?;
                self.metrics.succeeded_total.inc();
                info!("PVC {} 克隆完成", namespaced_name(pvc));
                self.recorder
                    .record(
                        &object_reference(pvc),
                        CloneEvent::normal(
                            REASON_SUCCESSFUL_CLONE,
                            format!("Clone from VolumeCloneSource {} completed", namespaced_name(source)),
                        ),
                    )
                    .await;
                Ok(Outcome::Done)
            }
            Err(e) => {
                debug!("阶段 {} 失败: {}", e.phase, e.error);
                Err(e.error)
            }
        }
    }

    /// 写入阶段名与进度，清除上一次的错误
    async fn update_clone_phase(
        &self,
        pvc: &PersistentVolumeClaim,
        phase: &str,
        statuses: &[PhaseProgress],
    ) -> Result<()> {
        let mut updated = pvc.clone();
        let meta = &mut updated.metadata;
        remove_annotation(meta, ANN_CLONE_ERROR);
        set_annotation(meta, ANN_CLONE_PHASE, phase);
        let mut reported = BTreeMap::new();
        for status in statuses {
            if !status.progress.is_empty() {
                set_annotation(meta, ANN_POPULATOR_PROGRESS, status.progress.clone());
            }
            for (key, value) in &status.annotations {
                reported.insert(key.clone(), value.clone());
                if MIRRORED_ANNOTATIONS.contains(&key.as_str()) {
                    set_annotation(meta, key, value.clone());
                }
            }
        }
        add_running_annotations(controlled_by_kind(pvc, DATA_VOLUME_KIND), meta, phase, &reported);

        if updated == *pvc {
            return Ok(());
        }
        if annotation(pvc, ANN_CLONE_PHASE) != Some(phase) {
            info!("PVC {} 进入阶段 {}", namespaced_name(pvc), phase);
            self.metrics.record_phase(phase);
        }
        self.client.replace_pvc(&updated).await?;
        Ok(())
    }

    /// 按错误分类决定重新排队或把错误写回目标 PVC
    async fn handle_pending_error(&self, pvc: &PersistentVolumeClaim, err: Error) -> Result<Outcome> {
        let kind = err.kind();
        self.metrics.record_error(kind.as_str());
        match kind {
            ErrorKind::Transient => {
                debug!("PVC {} 依赖的对象尚未出现: {}", namespaced_name(pvc), err);
                Ok(Outcome::Requeue(self.timings.default))
            }
            ErrorKind::Retriable => Err(err),
            ErrorKind::Quota => {
                warn!("PVC {} 受配额限制: {}", namespaced_name(pvc), err);
                Ok(Outcome::Requeue(self.timings.error))
            }
            _ => {
                error!("PVC {} 克隆失败: {}", namespaced_name(pvc), err);
                self.update_clone_phase_error(pvc, &err).await;
                Err(err)
            }
        }
    }

    /// 写入 `clonePhase=Error` 与错误信息，写入失败只记录日志
    async fn update_clone_phase_error(&self, pvc: &PersistentVolumeClaim, err: &Error) {
        let message = err.to_string();
        self.recorder
            .record(
                &object_reference(pvc),
                CloneEvent::warning(REASON_CLONE_FAILED, message.clone()),
            )
            .await;

        let mut updated = pvc.clone();
        let phase_changed = set_annotation(&mut updated.metadata, ANN_CLONE_PHASE, PHASE_ERROR);
        set_annotation(&mut updated.metadata, ANN_CLONE_ERROR, message);
        add_running_annotations(
            controlled_by_kind(pvc, DATA_VOLUME_KIND),
            &mut updated.metadata,
            PHASE_ERROR,
            &BTreeMap::new(),
        );
        if updated == *pvc {
            return;
        }
        if phase_changed {
            self.metrics.record_phase(PHASE_ERROR);
        }
        if let Err(e) = self.client.replace_pvc(&updated).await {
            warn!("写入 PVC {} 的错误注解失败: {}", namespaced_name(pvc), e);
        }
    }

    /// 回收临时对象，全部清理后移除 finalizer
    async fn reconcile_done(&self, pvc: &PersistentVolumeClaim) -> Result<Outcome> {
        let clean = self.planner.cleanup(pvc).await.map_err(|e| self.counted(e))?;
        if !clean {
            debug!("等待 {} 的临时对象删除", namespaced_name(pvc));
            return Ok(Outcome::Requeue(self.timings.default));
        }

        let mut updated = pvc.clone();
        if remove_finalizer(&mut updated.metadata, CLONE_POPULATOR_FINALIZER) {
            self.client
                .replace_pvc(&updated)
                .await
                .map_err(|e| self.counted(e))?;
            info!("已移除 PVC {} 的 finalizer", namespaced_name(pvc));
        }
        Ok(Outcome::Done)
    }
}
