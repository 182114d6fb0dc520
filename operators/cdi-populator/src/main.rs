//! cdi-populator 入口
//!
//! 解析命令行参数，初始化日志，加载配置并运行克隆填充器。

use anyhow::{Context, Result};
use cdi_populator::config::ControllerConfig;
use cdi_populator::PopulatorOperator;
use clap::Parser;
use kube::Client;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// VolumeCloneSource 克隆填充器
#[derive(Debug, Parser)]
#[command(name = "cdi-populator", version, about)]
struct Args {
    /// YAML 或 JSON 配置文件
    #[arg(long, env = "CDI_POPULATOR_CONFIG")]
    config: Option<PathBuf>,

    /// 日志级别，RUST_LOG 优先
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 以 JSON 格式输出日志
    #[arg(long)]
    log_json: bool,

    /// 覆盖配置中的指标监听地址
    #[arg(long)]
    metrics_address: Option<String>,

    /// 覆盖配置中的并发数
    #[arg(long)]
    concurrency: Option<usize>,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let mut config = ControllerConfig::load(args.config.as_deref())?;
    if let Some(address) = args.metrics_address {
        config.metrics_address = address;
    }
    if let Some(concurrency) = args.concurrency.filter(|c| *c > 0) {
        config.concurrency = concurrency;
    }

    let client = Client::try_default().await.context("创建 Kubernetes 客户端失败")?;
    info!("cdi-populator {} 启动", env!("CARGO_PKG_VERSION"));

    PopulatorOperator::new(client, &config)?.run().await
}
