//! 数据模型模块
//!
//! 该模块定义克隆流程读取的自定义资源：VolumeCloneSource、StorageProfile、
//! CDIConfig 以及 CSI 卷快照相关资源。

pub mod cdi_config;
pub mod clone_source;
pub mod snapshot;
pub mod storage_profile;
