//! 错误处理模块
//!
//! 该模块提供克隆编排核心的统一错误类型。错误按照处理方式分为几类：
//! 可重试的瞬时错误、配额错误、校验错误、前置条件错误以及完整性错误，
//! 协调器根据 [`ErrorKind`] 决定重新排队还是把错误写回目标 PVC。

use std::io;
use thiserror::Error;

/// 克隆编排统一错误类型
///
/// `Validation`、`Precondition`、`Integrity` 的消息会原样写入
/// `cdi.kubevirt.io/cloneError` 注解，因此不带任何前缀。
#[derive(Error, Debug)]
pub enum Error {
    /// 对象暂未出现，稍后可能出现
    #[error("{0} not found")]
    NotFound(String),

    /// 乐观并发写冲突
    #[error("conflict updating {0}")]
    Conflict(String),

    /// 对象已存在
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// 命名空间配额不足
    #[error("{0}")]
    QuotaExceeded(String),

    /// 输入校验失败（大小、内容类型、跨命名空间等）
    #[error("{0}")]
    Validation(String),

    /// 前置条件不满足（空 StorageClass、StorageClass 不存在等）
    #[error("{0}")]
    Precondition(String),

    /// 对象图完整性被破坏，需要人工介入
    #[error("{0}")]
    Integrity(String),

    /// 进度端点访问失败
    #[error("HTTP 请求失败: {0}")]
    Http(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// 错误的处理分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 对象尚未被观察到，按默认间隔重新排队，不修改状态
    Transient,
    /// 写冲突或网络抖动，立即重试
    Retriable,
    /// 配额拒绝，发出 ExceededQuota 事件后重新排队
    Quota,
    /// 校验失败
    Validation,
    /// 前置条件不满足
    Precondition,
    /// 完整性错误，不自动恢复
    Integrity,
    /// 其他内部错误
    Internal,
}

impl ErrorKind {
    /// 是否需要把错误写回 `clonePhase=Error`
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorKind::Transient | ErrorKind::Retriable | ErrorKind::Quota)
    }

    /// 用于指标标签的名称
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Retriable => "retriable",
            ErrorKind::Quota => "quota",
            ErrorKind::Validation => "validation",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::Integrity(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// 将 kube 客户端错误映射为带语义的错误
    ///
    /// `what` 描述被操作的对象，例如 `PersistentVolumeClaim ns/name`。
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(resp) => {
                let what = what.into();
                match resp.code {
                    404 => Error::NotFound(what),
                    409 if resp.reason == "AlreadyExists" => Error::AlreadyExists(what),
                    409 => Error::Conflict(what),
                    403 if resp.message.contains(QUOTA_MESSAGE_MARKER) => {
                        Error::QuotaExceeded(resp.message)
                    }
                    _ => Error::Kube(kube::Error::Api(resp)),
                }
            }
            other => Error::Kube(other),
        }
    }

    /// 返回错误的处理分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::Transient,
            Error::Conflict(_) => ErrorKind::Retriable,
            Error::AlreadyExists(_) => ErrorKind::Retriable,
            Error::QuotaExceeded(_) => ErrorKind::Quota,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Precondition(_) => ErrorKind::Precondition,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Kube(kube::Error::Api(resp)) => match resp.code {
                404 => ErrorKind::Transient,
                409 | 429 | 500..=599 => ErrorKind::Retriable,
                _ => ErrorKind::Internal,
            },
            Error::Kube(_) | Error::Http(_) => ErrorKind::Retriable,
            Error::Config(_) | Error::Json(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
            || matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Error::QuotaExceeded(_))
    }
}

/// 配额拒绝时 API server 返回消息中的标记
pub const QUOTA_MESSAGE_MARKER: &str = "exceeded quota:";
