//! CDI Populator - VolumeCloneSource 克隆填充器
//!
//! 该 crate 实现克隆填充器的 Kubernetes 控制器：监听通过 `dataSourceRef`
//! 引用 VolumeCloneSource 的 PVC，调用克隆编排核心完成克隆，并暴露
//! Prometheus 指标与健康检查端点。

pub mod config;
pub mod controller;
pub mod event_handler;
pub mod metrics;
pub mod reconcile;

use anyhow::{Context, Result};
use cdi_clone::{HttpProgressSource, KubeClusterClient, KubeEventRecorder, PhaseContext, Planner};
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ControllerConfig;
use crate::controller::{Controller, CONTROLLER_NAME};
use crate::metrics::Metrics;
use crate::reconcile::{ClonePopulatorReconciler, RequeueTimings};

/// Operator 主结构体
pub struct PopulatorOperator {
    controller: Controller,
    metrics: Arc<Metrics>,
    metrics_address: SocketAddr,
}

impl PopulatorOperator {
    /// 按配置组装客户端、规划器与协调器
    pub fn new(client: Client, config: &ControllerConfig) -> Result<Self> {
        let metrics_address: SocketAddr = config
            .metrics_address
            .parse()
            .with_context(|| format!("无效的指标地址: {}", config.metrics_address))?;
        let metrics = Arc::new(Metrics::new().context("注册指标失败")?);

        let cluster = Arc::new(KubeClusterClient::new(client.clone()));
        let recorder = Arc::new(KubeEventRecorder::new(client.clone(), CONTROLLER_NAME));
        let progress = Arc::new(HttpProgressSource::new(&config.progress_tls).context("创建进度采集客户端失败")?);
        let planner = Arc::new(Planner::new(
            PhaseContext::new(cluster.clone(), recorder.clone()),
            progress,
            config.prep_pod(),
        ));

        let reconciler = Arc::new(ClonePopulatorReconciler::new(
            cluster,
            recorder,
            planner,
            metrics.clone(),
            RequeueTimings {
                default: config.default_requeue(),
                error: config.error_requeue(),
            },
        ));

        Ok(Self {
            controller: Controller::new(client, reconciler, config.concurrency),
            metrics,
            metrics_address,
        })
    }

    /// 运行控制器与指标服务器，控制器退出后关闭指标服务器
    pub async fn run(self) -> Result<()> {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(metrics::serve(self.metrics_address, self.metrics.clone(), async move {
            let _ = stop_rx.await;
        }));

        let result = self.controller.run().await;
        let _ = stop_tx.send(());
        match server.await {
            Ok(Err(e)) => error!("指标服务器错误: {:#}", e),
            Err(e) => error!("指标服务器任务异常: {}", e),
            Ok(Ok(())) => {}
        }
        info!("克隆填充器已停止");
        result
    }
}
