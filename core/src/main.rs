use anyhow::{Context, Result};
use clap::Parser;
use elfport_core::logger;
use elfport_core::server::ConnectorServer;
use elfport_shared::utils::common::format_bytes;
use elfport_shared::ConnectorConfig;
use std::path::PathBuf;
use tracing::{error, info};

/// elfport: elFinder connector serving a local directory over HTTP
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// 要共享的根目录
    #[clap(value_name = "ROOT")]
    root: Option<PathBuf>,

    /// 监听地址
    #[clap(long)]
    host: Option<String>,

    /// 监听端口
    #[clap(short, long)]
    port: Option<u16>,

    /// 配置文件路径
    #[clap(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[clap(short, long)]
    log_level: Option<String>,

    /// 启用调试日志（相当于 --log-level=debug）
    #[clap(short, long)]
    verbose: bool,

    /// 同时写入按天滚动的日志文件
    #[clap(long)]
    log_file: bool,

    /// 将最终配置写入文件后退出
    #[clap(long, value_name = "FILE")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Some(path) = &cli.write_config {
        config.save_to_file(path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    logger::init_logger(&config.log_level, cli.log_file)?;

    info!("==== elfport 启动 ====");
    info!("根目录: {}", config.root.display());
    info!("日志级别: {}", config.log_level);
    info!("上传上限: {}", format_bytes(config.upload_max_size));

    let connector_path = config.connector_path.clone();
    let server = ConnectorServer::new(config)?;
    let listener = server.bind()?;
    let addr = listener.local_addr()?;
    println!("elfport listening on http://{}{}", addr, connector_path);

    if let Err(e) = server.serve(listener, shutdown_signal()).await {
        error!("服务异常退出: {:?}", e);
        return Err(e);
    }

    info!("服务已关闭");
    Ok(())
}

/// 加载配置，命令行参数优先
fn load_config(cli: &Cli) -> Result<ConnectorConfig> {
    let mut config = match &cli.config {
        Some(path) => ConnectorConfig::from_file(path)
            .with_context(|| format!("无法加载配置文件: {:?}", path))?,
        None => match ConnectorConfig::find_config_file() {
            Some(path) => ConnectorConfig::from_file(&path)?,
            None => ConnectorConfig::default(),
        },
    };

    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(host) = &cli.host {
        config.bind_host = host.clone();
    }
    if let Some(port) = cli.port {
        config.bind_port = port;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.verbose {
        config.log_level = "debug".to_string();
    }

    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到关闭信号");
}
