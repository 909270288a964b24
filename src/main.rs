// sshpool - SSH SOCKS5 代理池管理器
// 应用入口

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

mod constants;
mod models;
mod pool;
mod services;
mod ssh;

use models::parse_credential_list;
use pool::{HealthChecker, PoolRegistry};
use services::{storage, TaskRunner};
use ssh::TunnelManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug cargo run
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sshpool=info")),
        )
        .init();

    // 加载设置与上次的池状态，首次运行把默认设置落盘方便修改
    let settings = storage::load_settings()?;
    if !storage::get_settings_file()?.exists() {
        storage::save_settings(&settings)?;
    }
    let registry = Arc::new(PoolRegistry::new());
    if let Some(snapshot) = storage::load_pool()? {
        registry.restore(snapshot);
    }
    let created = registry.ensure_ports(&settings.ports)?;
    if created > 0 {
        info!("[Main] Created {} managed ports", created);
    }

    // 命令行可选传入凭据列表文件，启动时批量导入
    if let Some(path) = std::env::args().nth(1) {
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("无法读取凭据列表文件 {}", path))?;
        let inserted = registry.insert_credentials(parse_credential_list(&content));
        info!("[Main] Imported {} new credentials from {}", inserted, path);
    }

    // 启动后台扫描
    let tunnels = Arc::new(TunnelManager::new());
    let checker = Arc::new(HealthChecker::new(
        registry.clone(),
        tunnels.clone(),
        settings.clone(),
    ));
    let mut runner = TaskRunner::start(registry.clone(), checker, Arc::new(settings));

    info!("[Main] sshpool running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("无法监听 Ctrl+C 信号")?;

    // 优雅退出：停扫描、拆隧道、落盘
    info!("[Main] Shutting down...");
    runner.stop().await;
    tunnels.stop_all();
    if let Err(e) = storage::save_pool(&registry.snapshot()) {
        warn!("[Main] Failed to save pool snapshot: {}", e);
    }

    Ok(())
}
