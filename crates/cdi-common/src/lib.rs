//! CDI Clone Common - 跨模块共享的资源模型、常量与错误类型
//!
//! 该 crate 提供克隆编排核心各组件共享的数据结构：自定义资源定义、
//! 注解与标签常量、Kubernetes 数量计算以及统一的错误处理机制。

pub mod consts;
pub mod error;
pub mod models;
pub mod quantity;

/// 重新导出常用类型，方便使用
pub use error::{Error, ErrorKind, Result};
pub use models::cdi_config::*;
pub use models::clone_source::*;
pub use models::snapshot::*;
pub use models::storage_profile::*;
