//! 克隆进度采集
//!
//! 工作 Pod 通过 HTTPS 暴露 Prometheus 文本格式的指标，其中
//! `kubevirt_cdi_clone_progress_total{ownerUID="<uid>"}` 表示完成百分比。
//! 控制器使用配置的 CA 与客户端证书访问该端点。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use cdi_common::{Error, Result};
use k8s_openapi::api::core::v1::Pod;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// 工作 Pod 暴露的克隆进度指标
pub const CLONE_PROGRESS_METRIC: &str = "kubevirt_cdi_clone_progress_total";

const METRICS_PORT_NAME: &str = "metrics";
const DEFAULT_METRICS_PORT: i32 = 8443;
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

/// 指标端点读取接口
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// 读取 `url` 的指标文本
    async fn fetch_metrics(&self, url: &str) -> Result<String>;
}

/// 进度端点的 TLS 配置
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProgressTlsConfig {
    /// 校验工作 Pod 证书的 CA
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// 客户端证书
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// 客户端私钥
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// 跳过服务端证书校验，仅用于测试环境
    #[serde(default)]
    pub insecure: bool,
}

/// 基于 reqwest 的指标读取
#[derive(Clone)]
pub struct HttpProgressSource {
    client: reqwest::Client,
}

impl HttpProgressSource {
    pub fn new(tls: &ProgressTlsConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(SCRAPE_TIMEOUT)
            .use_rustls_tls();

        if let Some(ca_path) = &tls.ca_path {
            let pem = std::fs::read(ca_path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::config(format!("invalid CA certificate {}: {}", ca_path.display(), e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) {
            let mut pem = std::fs::read(cert_path)?;
            pem.extend_from_slice(b"\n");
            pem.extend(std::fs::read(key_path)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| Error::config(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        if tls.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config(format!("failed to build progress client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProgressSource for HttpProgressSource {
    async fn fetch_metrics(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("{url} returned {status}")));
        }
        response.text().await.map_err(|e| Error::Http(e.to_string()))
    }
}

/// 工作 Pod 的指标地址，Pod 尚无 IP 时返回 `None`
pub fn metrics_url(pod: &Pod) -> Option<String> {
    let ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())?;

    let port = pod
        .spec
        .as_ref()
        .into_iter()
        .flat_map(|s| s.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .find(|p| p.name.as_deref() == Some(METRICS_PORT_NAME))
        .map(|p| p.container_port)
        .unwrap_or(DEFAULT_METRICS_PORT);

    Some(format!("https://{ip}:{port}/metrics"))
}

/// 从指标文本中取出 `metric{ownerUID="<owner_uid>"}` 的值
pub fn parse_progress(body: &str, metric: &str, owner_uid: &str) -> Option<f64> {
    let pattern = format!(
        r#"{}\{{ownerUID="{}"\}} (\d{{1,3}}\.?\d*)"#,
        regex::escape(metric),
        regex::escape(owner_uid)
    );
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            debug!("进度正则构造失败: {}", e);
            return None;
        }
    };
    re.captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// 百分比字符串，保留两位小数
pub fn format_progress(value: f64) -> String {
    format!("{value:.2}%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodStatus};
    use rstest::rstest;

    const BODY: &str = "\
# HELP kubevirt_cdi_clone_progress_total The clone progress in percentage
# TYPE kubevirt_cdi_clone_progress_total counter
kubevirt_cdi_clone_progress_total{ownerUID=\"other\"} 12.5
kubevirt_cdi_clone_progress_total{ownerUID=\"T\"} 45.678
";

    #[rstest]
    #[case("T", Some(45.678))]
    #[case("other", Some(12.5))]
    #[case("missing", None)]
    fn test_parse_progress(#[case] uid: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_progress(BODY, CLONE_PROGRESS_METRIC, uid), expected);
    }

    #[rstest]
    #[case(45.678, "45.68%")]
    #[case(100.0, "100.00%")]
    #[case(0.0, "0.00%")]
    fn test_format_progress(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(format_progress(value), expected);
    }

    fn pod(ip: Option<&str>, ports: Vec<ContainerPort>) -> Pod {
        Pod {
            metadata: Default::default(),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "cloner".into(),
                    ports: Some(ports),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: ip.map(String::from),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_metrics_url_uses_named_port() {
        let named = pod(
            Some("10.0.0.7"),
            vec![ContainerPort {
                name: Some("metrics".into()),
                container_port: 9443,
                ..Default::default()
            }],
        );
        assert_eq!(metrics_url(&named).as_deref(), Some("https://10.0.0.7:9443/metrics"));

        let unnamed = pod(Some("10.0.0.7"), vec![]);
        assert_eq!(metrics_url(&unnamed).as_deref(), Some("https://10.0.0.7:8443/metrics"));

        assert!(metrics_url(&pod(None, vec![])).is_none());
    }

    #[tokio::test]
    async fn test_mock_source_round_trip() {
        let mut source = MockProgressSource::new();
        source
            .expect_fetch_metrics()
            .withf(|url| url == "https://10.0.0.7:8443/metrics")
            .returning(|_| Ok(BODY.to_string()));

        let body = source.fetch_metrics("https://10.0.0.7:8443/metrics").await.unwrap();
        assert_eq!(parse_progress(&body, CLONE_PROGRESS_METRIC, "T"), Some(45.678));
    }

    #[test]
    fn test_insecure_client_builds_without_files() {
        let tls = ProgressTlsConfig {
            insecure: true,
            ..Default::default()
        };
        assert!(HttpProgressSource::new(&tls).is_ok());
    }
}
