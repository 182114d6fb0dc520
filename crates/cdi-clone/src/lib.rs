//! CDI Clone - 克隆编排核心
//!
//! 该 crate 实现目标 PVC 克隆的核心流程：解析存储能力、选择克隆策略、
//! 按阶段创建中间对象，最后把中间 PVC 的 PV 重绑定到目标 PVC。
//! 集群访问通过 [`client::ClusterClient`] 抽象，便于在测试中替换为内存实现。

pub mod capability;
pub mod client;
pub mod events;
pub mod phase;
pub mod planner;
pub mod progress;
pub mod readiness;
pub mod rebind;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capability::{BindingMode, CapabilityResolver, ClaimCapabilities};
pub use client::{ClusterClient, KubeClusterClient};
pub use events::{CloneEvent, EventRecorder, KubeEventRecorder};
pub use phase::{run_phases, Phase, PhaseContext, PhaseError, PhaseProgress, PhaseRun, PrepPodConfig, Requeue};
pub use planner::{ClonePlanner, Planner};
pub use progress::{HttpProgressSource, ProgressSource, ProgressTlsConfig};
