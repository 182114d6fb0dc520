//! 配置管理模块
//!
//! 该模块负责加载克隆填充器的启动配置。配置按以下顺序叠加：
//! 内置默认值、可选的 YAML/JSON 配置文件、`CDI_POPULATOR__` 前缀的环境变量。
//! 集群级的运行时设置（克隆策略覆盖、文件系统开销等）不在这里，
//! 而是在每次协调时从 CDIConfig 单例读取。

use anyhow::{anyhow, Context, Result};
use cdi_clone::{PrepPodConfig, ProgressTlsConfig};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CDI_POPULATOR";

/// 填充器配置
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// 同时协调的目标 PVC 上限
    pub concurrency: usize,
    /// PrepPod 镜像
    pub prep_image: String,
    /// PrepPod 镜像拉取策略
    pub pull_policy: String,
    /// 安装器附加在工作负载上的标签
    pub installer_labels: BTreeMap<String, String>,
    /// 指标与健康检查监听地址
    pub metrics_address: String,
    /// 访问工作 Pod 进度端点的 TLS 配置
    pub progress_tls: ProgressTlsConfig,
    /// 阶段未完成时的默认重新排队间隔（秒）
    pub default_requeue_seconds: u64,
    /// 配额等可恢复错误的重新排队间隔（秒）
    pub error_requeue_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let prep = PrepPodConfig::default();
        Self {
            concurrency: 5,
            prep_image: prep.image,
            pull_policy: prep.pull_policy,
            installer_labels: prep.installer_labels,
            metrics_address: "0.0.0.0:8080".to_string(),
            progress_tls: ProgressTlsConfig::default(),
            default_requeue_seconds: 10,
            error_requeue_seconds: 30,
        }
    }
}

impl ControllerConfig {
    /// 加载配置，`path` 为空时只使用默认值与环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
            };
            builder = builder.add_source(File::with_name(file).format(format));
            info!("加载配置文件 {}", path.display());
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("构建配置失败")?;

        let loaded = config
            .try_deserialize::<ControllerConfig>()
            .context("配置格式错误")?;
        loaded.validate()?;
        debug!("生效配置: {:?}", loaded);
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow!("concurrency 必须大于 0"));
        }
        if self.prep_image.is_empty() {
            return Err(anyhow!("prep_image 不能为空"));
        }
        Ok(())
    }

    pub fn prep_pod(&self) -> PrepPodConfig {
        PrepPodConfig {
            image: self.prep_image.clone(),
            pull_policy: self.pull_policy.clone(),
            installer_labels: self.installer_labels.clone(),
        }
    }

    pub fn default_requeue(&self) -> Duration {
        Duration::from_secs(self.default_requeue_seconds)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ControllerConfig::load(None).unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.metrics_address, "0.0.0.0:8080");
        assert_eq!(config.default_requeue(), Duration::from_secs(10));
        assert_eq!(config.error_requeue(), Duration::from_secs(30));
        assert_eq!(config.prep_pod(), PrepPodConfig::default());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let file = write_config(
            ".yaml",
            r#"
concurrency: 8
prep_image: registry.local/cdi-importer:v1
installer_labels:
  app.kubernetes.io/part-of: cdi
progress_tls:
  ca_path: /etc/cdi/ca.crt
  insecure: true
"#,
        );
        let config = ControllerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.pull_policy, "IfNotPresent");
        assert_eq!(config.progress_tls.ca_path.as_deref(), Some(Path::new("/etc/cdi/ca.crt")));
        assert!(config.progress_tls.insecure);

        let prep = config.prep_pod();
        assert_eq!(prep.image, "registry.local/cdi-importer:v1");
        assert_eq!(prep.installer_labels.get("app.kubernetes.io/part-of").map(String::as_str), Some("cdi"));
    }

    #[test]
    fn test_json_file_is_supported() {
        let file = write_config(".json", r#"{"error_requeue_seconds": 5}"#);
        let config = ControllerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.error_requeue(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_unknown_format_and_zero_concurrency() {
        let file = write_config(".toml", "concurrency = 1");
        assert!(ControllerConfig::load(Some(file.path())).is_err());

        let file = write_config(".yaml", "concurrency: 0");
        let err = ControllerConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }
}
