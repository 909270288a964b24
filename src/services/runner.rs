// 后台扫描任务
//
// 周期性驱动两类扫描：凭据存活检查与端口分配/确认。
// 两个阶段彼此并发，阶段内按实体分发、用信号量限并发；
// 同一实体靠 is_checking 标记串行化，分发前先过滤

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::storage;
use crate::models::AppSettings;
use crate::pool::{select_credential_for, HealthChecker, PoolRegistry};

/// 后台扫描任务
pub struct TaskRunner {
    stop_tx: Option<watch::Sender<bool>>,
    task_handle: Option<JoinHandle<()>>,
}

impl TaskRunner {
    /// 启动扫描循环
    pub fn start(
        registry: Arc<PoolRegistry>,
        checker: Arc<HealthChecker>,
        settings: Arc<AppSettings>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_sweep_loop(registry, checker, settings, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            task_handle: Some(task),
        }
    }

    /// 是否仍在运行
    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// 停止扫描
    /// 只是不再开启新一轮，在途的实体检查等它们自然跑完
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
        info!("[Runner] Stopped");
    }
}

/// 扫描主循环
async fn run_sweep_loop(
    registry: Arc<PoolRegistry>,
    checker: Arc<HealthChecker>,
    settings: Arc<AppSettings>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(
        "[Runner] Sweep loop started (interval {}s)",
        settings.sweep_interval_secs
    );
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.sweep_interval_secs));

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // 两个阶段并发，各自内部等待本轮批次全部完成
                tokio::join!(
                    sweep_credentials(&registry, &checker, &settings),
                    sweep_ports(&registry, &checker, &settings),
                );

                if let Err(e) = storage::save_pool(&registry.snapshot()) {
                    warn!("[Runner] Failed to persist pool snapshot: {}", e);
                }
            }
        }
    }

    info!("[Runner] Sweep loop exited");
}

/// 凭据扫描：对每个不在检查中的凭据做一次存活判定
async fn sweep_credentials(
    registry: &Arc<PoolRegistry>,
    checker: &Arc<HealthChecker>,
    settings: &AppSettings,
) {
    let semaphore = Arc::new(Semaphore::new(settings.ssh_check_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for credential in registry.credentials() {
        if credential.is_checking {
            continue;
        }
        let key = credential.key();
        if let Err(e) = registry.begin_checking_credential(&key) {
            debug!("[Runner] Skip credential {}: {}", key, e);
            continue;
        }

        let registry = registry.clone();
        let checker = checker.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let is_live = checker.check_credential(&key).await;
            if let Err(e) = registry.end_checking_credential(&key, is_live) {
                warn!("[Runner] Failed to finish credential check {}: {}", key, e);
            }
        });
    }

    while tasks.join_next().await.is_some() {}
}

/// 端口扫描：过期的先回收，未分配的选凭据，已分配的建隧道并确认出口 IP
async fn sweep_ports(
    registry: &Arc<PoolRegistry>,
    checker: &Arc<HealthChecker>,
    settings: &AppSettings,
) {
    let cutoff = Local::now() - chrono::Duration::seconds(settings.stale_after_secs);
    let semaphore = Arc::new(Semaphore::new(settings.port_check_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for port in registry.ports() {
        if port.is_checking || !port.auto_connect {
            continue;
        }
        let number = port.port_number;
        if let Err(e) = registry.begin_checking_port(number) {
            debug!("[Runner] Skip port {}: {}", number, e);
            continue;
        }

        let registry = registry.clone();
        let checker = checker.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            check_port(&registry, &checker, number, cutoff).await;
            if let Err(e) = registry.end_checking_port(number) {
                warn!("[Runner] Failed to finish port check {}: {}", number, e);
            }
        });
    }

    while tasks.join_next().await.is_some() {}
}

/// 单个端口的检查流程
async fn check_port(
    registry: &Arc<PoolRegistry>,
    checker: &Arc<HealthChecker>,
    number: u16,
    cutoff: chrono::DateTime<Local>,
) {
    let Some(port) = registry.port(number) else {
        return;
    };

    // 过期的先回收，然后重新进入未分配路径
    if port.need_reset(cutoff) {
        info!("[Runner] Port {} stale, recycling", number);
        if let Err(e) = checker.recycle_port(number) {
            warn!("[Runner] Failed to recycle port {}: {}", number, e);
            return;
        }
    }

    let Some(port) = registry.port(number) else {
        return;
    };
    if port.need_ssh() {
        match select_credential_for(registry, number, true) {
            Ok(Some(key)) => {
                if let Err(e) = registry.assign(number, Some(key)) {
                    warn!("[Runner] Failed to assign port {}: {}", number, e);
                    return;
                }
            }
            Ok(None) => {
                // 没有合适凭据不是错误，等下一轮
                debug!("[Runner] No eligible credential for port {}", number);
                return;
            }
            Err(e) => {
                warn!("[Runner] Credential selection for port {} failed: {}", number, e);
                return;
            }
        }
    }

    // 已分配的端口每轮都重新确认出口 IP（隧道挂了会就地重建）
    if let Err(e) = checker.connect_and_confirm(number).await {
        warn!("[Runner] Port {} check failed: {}", number, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CredentialKey;
    use crate::ssh::TunnelManager;

    fn key(ip: &str) -> CredentialKey {
        CredentialKey {
            ip: ip.to_string(),
            username: "user1".to_string(),
            password: "pass1".to_string(),
        }
    }

    fn checker(registry: &Arc<PoolRegistry>, settings: &AppSettings) -> Arc<HealthChecker> {
        Arc::new(HealthChecker::new(
            registry.clone(),
            Arc::new(TunnelManager::new()),
            settings.clone(),
        ))
    }

    #[tokio::test]
    async fn test_sweep_ports_without_live_credentials_leaves_ports_idle() {
        let registry = Arc::new(PoolRegistry::new());
        registry.ensure_ports(&[8080, 8081]).unwrap();
        registry.insert_credentials(vec![key("10.0.0.1")]);
        let settings = AppSettings::default();

        sweep_ports(&registry, &checker(&registry, &settings), &settings).await;

        for port in registry.ports() {
            assert!(!port.is_checking);
            assert!(port.ssh.is_none());
            assert!(port.last_checked.is_some());
        }
    }

    #[tokio::test]
    async fn test_sweep_skips_entities_already_checking() {
        let registry = Arc::new(PoolRegistry::new());
        registry.ensure_ports(&[8080]).unwrap();
        registry.insert_credentials(vec![key("10.0.0.1")]);
        let settings = AppSettings::default();

        // 外部（比如 Web 层）已占住检查权
        registry.begin_checking_credential(&key("10.0.0.1")).unwrap();
        registry.begin_checking_port(8080).unwrap();

        sweep_credentials(&registry, &checker(&registry, &settings), &settings).await;
        sweep_ports(&registry, &checker(&registry, &settings), &settings).await;

        // 在途标记原样保留，说明扫描没有碰它们
        assert!(registry.credential(&key("10.0.0.1")).unwrap().is_checking);
        assert!(registry.port(8080).unwrap().is_checking);
    }

    #[tokio::test]
    async fn test_stop_waits_for_loop_to_exit() {
        let registry = Arc::new(PoolRegistry::new());
        let settings = Arc::new(AppSettings {
            sweep_interval_secs: 3600,
            ..AppSettings::default()
        });
        let mut runner = TaskRunner::start(
            registry.clone(),
            checker(&registry, &settings),
            settings.clone(),
        );
        assert!(runner.is_running());

        runner.stop().await;
        assert!(!runner.is_running());
    }
}
