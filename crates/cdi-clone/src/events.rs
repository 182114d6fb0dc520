//! 用户可见事件
//!
//! 克隆过程中的告警与结果以 Kubernetes 事件的形式记录在目标 PVC 上。
//! 事件发布失败只记录日志，不影响协调流程。

use std::collections::HashSet;

use async_trait::async_trait;
use cdi_common::consts::REASON_EXCEEDED_QUOTA;
use cdi_common::{Error, Result};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim};
use kube::runtime::events::{Event as KubeEvent, EventType as KubeEventType, Recorder, Reporter};
use kube::Client;
use tracing::{debug, warn};

use crate::client::ClusterClient;
use crate::utils::{object_reference, uid_of};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }

    pub(crate) fn parse(value: Option<&str>) -> Self {
        match value {
            Some("Warning") => EventType::Warning,
            _ => EventType::Normal,
        }
    }
}

/// 一条待发布的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneEvent {
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

impl CloneEvent {
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// 事件记录接口
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// 在 `object` 上记录事件
    async fn record(&self, object: &ObjectReference, event: CloneEvent);
}

/// 基于 kube-runtime 的事件记录器
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self { client, reporter }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, object: &ObjectReference, event: CloneEvent) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        let type_ = match event.type_ {
            EventType::Normal => KubeEventType::Normal,
            EventType::Warning => KubeEventType::Warning,
        };
        let result = recorder
            .publish(KubeEvent {
                type_,
                reason: event.reason.clone(),
                note: Some(event.message.clone()),
                action: event.reason.clone(),
                secondary: None,
            })
            .await;
        if let Err(e) = result {
            warn!(
                "发布事件 {} 到 {}/{} 失败: {}",
                event.reason,
                object.namespace.as_deref().unwrap_or_default(),
                object.name.as_deref().unwrap_or_default(),
                e
            );
        }
    }
}

/// 创建失败时若为配额拒绝，在 `owner` 上记录 ExceededQuota 告警
pub async fn record_quota_exceeded(
    recorder: &dyn EventRecorder,
    owner: &PersistentVolumeClaim,
    err: &Error,
) {
    if err.is_quota_exceeded() {
        recorder
            .record(
                &object_reference(owner),
                CloneEvent::warning(REASON_EXCEEDED_QUOTA, err.to_string()),
            )
            .await;
    }
}

/// 将中间 PVC 上的事件复制到目标 PVC，按原因与消息去重
pub async fn copy_events(
    client: &dyn ClusterClient,
    recorder: &dyn EventRecorder,
    from: &PersistentVolumeClaim,
    to: &PersistentVolumeClaim,
) -> Result<()> {
    let from_ns = from.metadata.namespace.as_deref().unwrap_or_default();
    let to_ns = to.metadata.namespace.as_deref().unwrap_or_default();
    let source_events = client.list_events(from_ns, &uid_of(from)?).await?;
    if source_events.is_empty() {
        return Ok(());
    }

    let existing: HashSet<(String, String)> = client
        .list_events(to_ns, &uid_of(to)?)
        .await?
        .into_iter()
        .map(|e| (e.reason.unwrap_or_default(), e.message.unwrap_or_default()))
        .collect();

    let target = object_reference(to);
    for event in source_events {
        let key = (
            event.reason.clone().unwrap_or_default(),
            event.message.clone().unwrap_or_default(),
        );
        if key.0.is_empty() || existing.contains(&key) {
            continue;
        }
        debug!("复制事件 {} 到 {}/{}", key.0, to_ns, to.metadata.name.as_deref().unwrap_or_default());
        recorder
            .record(
                &target,
                CloneEvent {
                    type_: EventType::parse(event.type_.as_deref()),
                    reason: key.0,
                    message: key.1,
                },
            )
            .await;
    }
    Ok(())
}
