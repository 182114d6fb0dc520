//! 指标收集与导出模块
//!
//! 该模块维护克隆填充器的 Prometheus 指标，并通过 HTTP 暴露
//! `/metrics`（文本格式）与 `/healthz`（存活探针）两个端点。

use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// 填充器指标
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// 协调次数
    pub reconcile_total: IntCounter,
    /// 按错误分类统计的协调失败次数
    pub reconcile_errors_total: IntCounterVec,
    /// 写入 `clonePhase` 的阶段变化次数
    pub phase_transitions_total: IntCounterVec,
    /// 成功完成的克隆数
    pub succeeded_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let reconcile_total = IntCounter::new(
            "cdi_clone_reconcile_total",
            "Total number of clone populator reconciliations",
        )?;
        let reconcile_errors_total = IntCounterVec::new(
            Opts::new(
                "cdi_clone_reconcile_errors_total",
                "Total number of failed clone populator reconciliations",
            ),
            &["kind"],
        )?;
        let phase_transitions_total = IntCounterVec::new(
            Opts::new(
                "cdi_clone_phase_transitions_total",
                "Total number of clone phase transitions recorded on target claims",
            ),
            &["phase"],
        )?;
        let succeeded_total = IntCounter::new(
            "cdi_clone_succeeded_total",
            "Total number of completed clones",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(phase_transitions_total.clone()))?;
        registry.register(Box::new(succeeded_total.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors_total,
            phase_transitions_total,
            succeeded_total,
        })
    }

    pub fn record_error(&self, kind: &str) {
        self.reconcile_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn record_phase(&self, phase: &str) {
        self.phase_transitions_total.with_label_values(&[phase]).inc();
    }

    /// 以文本格式导出全部指标
    pub fn render(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("编码指标失败")?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

/// 处理单个 HTTP 请求
pub async fn handle(metrics: Arc<Metrics>, req: Request<Body>) -> Response<Body> {
    match req.uri().path() {
        "/metrics" => match metrics.render() {
            Ok((content_type, body)) => {
                let mut response = Response::new(Body::from(body));
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!("导出指标失败: {:#}", e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        },
        "/healthz" => status_response(StatusCode::OK, "ok"),
        _ => status_response(StatusCode::NOT_FOUND, "not found"),
    }
}

fn status_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

/// 启动指标与健康检查服务器，直到 `shutdown` 完成
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let make_svc = make_service_fn(move |_| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle(metrics, req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("无法监听 {addr}"))?
        .serve(make_svc);
    info!("指标服务器监听于 {}", addr);

    server
        .with_graceful_shutdown(shutdown)
        .await
        .context("指标服务器异常退出")
}
