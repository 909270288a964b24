// 健康检查器
//
// 凭据检查：带超时的 SSH 握手+认证，成功即存活，任何失败都判死，
// 单次检查内不重试（死了就死了，等下一轮扫描）。
// 端口确认：经本地 SOCKS5 代理向多个回显端点竞速发起 HTTP 探测，
// 拿到出口 IP 即确认连通，重试耗尽则判断开。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{LOCAL_PROBE_HOST, PROBE_ENDPOINTS};
use crate::models::{AppSettings, CredentialKey};
use crate::pool::racer::{race_first_success, RaceError};
use crate::pool::registry::{PoolError, PoolRegistry};
use crate::ssh::{SshClient, SshConfig, SshDialer, TunnelManager};

/// 出口 IP 探测错误
#[derive(Debug, Error)]
pub enum ProbeError {
    /// HTTP 请求失败（单端点故障，竞速原语就地消化）
    #[error("Probe request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 回显端点返回空响应
    #[error("Echo endpoint returned empty body")]
    Empty,
}

/// 健康检查器
pub struct HealthChecker {
    registry: Arc<PoolRegistry>,
    tunnels: Arc<TunnelManager>,
    settings: AppSettings,
}

impl HealthChecker {
    /// 创建健康检查器
    pub fn new(
        registry: Arc<PoolRegistry>,
        tunnels: Arc<TunnelManager>,
        settings: AppSettings,
    ) -> Self {
        Self {
            registry,
            tunnels,
            settings,
        }
    }

    /// 检查凭据存活：SSH 握手 + 密码认证，带超时
    /// 返回本轮的存活判定，由调用方写回注册表
    pub async fn check_credential(&self, key: &CredentialKey) -> bool {
        let Some(credential) = self.registry.credential(key) else {
            return false;
        };
        let config =
            SshConfig::from_credential(&credential, self.settings.ssh_connect_timeout_secs);

        match SshClient::new(config).connect().await {
            Ok(handle) => {
                // 只验证存活，连接用完即断
                let _ = handle
                    .disconnect(russh::Disconnect::ByApplication, "", "en")
                    .await;
                debug!("[Checker] Credential {} is alive", key);
                true
            }
            Err(e) => {
                debug!("[Checker] Credential {} check failed: {}", key, e);
                false
            }
        }
    }

    /// 为已分配凭据的端口建立隧道并确认出口 IP
    ///
    /// 探测成功 mark_connected，重试耗尽则拆掉隧道、清除分配，
    /// 让下一轮扫描重新选凭据
    pub async fn connect_and_confirm(&self, port_number: u16) -> Result<(), PoolError> {
        let port = self
            .registry
            .port(port_number)
            .ok_or(PoolError::UnknownPort(port_number))?;
        let Some(key) = port.ssh.clone() else {
            return Err(PoolError::Unassigned(port_number));
        };
        let Some(credential) = self.registry.credential(&key) else {
            // 凭据已不存在（外部编辑），清除分配
            return self.registry.assign(port_number, None);
        };

        // 隧道不在了就重新建：SSH 连接 + 本地 SOCKS5 监听
        if !self.tunnels.is_running(port_number) {
            let config =
                SshConfig::from_credential(&credential, self.settings.ssh_connect_timeout_secs);
            let handle = match SshClient::new(config).connect().await {
                Ok(handle) => handle,
                Err(e) => {
                    debug!(
                        "[Checker] SSH connect for port {} via {} failed: {}",
                        port_number, key, e
                    );
                    return self.registry.assign(port_number, None);
                }
            };
            if let Err(e) = self
                .tunnels
                .start(port_number, &self.settings.bind_host, SshDialer::new(handle))
                .await
            {
                warn!("[Checker] Tunnel start on port {} failed: {}", port_number, e);
                return self.registry.assign(port_number, None);
            }
        }

        // 经本地代理确认出口 IP
        let proxy_url = format!("socks5h://{}:{}", LOCAL_PROBE_HOST, port_number);
        match self.probe_external_ip(&proxy_url).await {
            Ok(ip) => {
                info!("[Checker] Port {} confirmed, external ip {}", port_number, ip);
                self.registry.mark_connected(port_number, &ip)
            }
            Err(e) => {
                warn!("[Checker] Port {} unreachable: {}", port_number, e);
                self.tunnels.stop(port_number);
                self.registry.mark_disconnected(port_number)?;
                self.registry.assign(port_number, None)
            }
        }
    }

    /// 回收端口：拆隧道、清分配（过期端口重新进入未分配路径）
    pub fn recycle_port(&self, port_number: u16) -> Result<(), PoolError> {
        self.tunnels.stop(port_number);
        self.registry.assign(port_number, None)
    }

    /// 经代理探测出口 IP
    /// 每轮对所有回显端点竞速，单端点故障不影响确认；
    /// 一轮全失败后按配置的次数重试
    async fn probe_external_ip(&self, proxy_url: &str) -> Result<String, RaceError<ProbeError>> {
        let client = match reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(proxy_url).map_err(|e| RaceError::Failed(e.into()))?)
            .timeout(Duration::from_secs(self.settings.probe_timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(e) => return Err(RaceError::Failed(e.into())),
        };

        let mut last_error = RaceError::Timeout;
        for attempt in 0..=self.settings.probe_retries {
            let handles = PROBE_ENDPOINTS.iter().map(|&endpoint| {
                let client = client.clone();
                tokio::spawn(async move { fetch_ip(client, endpoint).await })
            });

            match race_first_success(handles.collect::<Vec<_>>()).await {
                Ok(ip) => return Ok(ip),
                Err(e) => {
                    debug!(
                        "[Checker] Probe attempt {} via {} failed: {}",
                        attempt + 1,
                        proxy_url,
                        e
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// 向单个回显端点请求出口 IP
async fn fetch_ip(client: reqwest::Client, endpoint: &str) -> Result<String, ProbeError> {
    let text = client.get(endpoint).send().await?.text().await?;
    let ip = text.trim().to_string();
    if ip.is_empty() {
        return Err(ProbeError::Empty);
    }
    Ok(ip)
}
