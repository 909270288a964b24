// SSH 连接配置

use std::time::Duration;

use crate::models::Credential;

/// SSH 连接配置
/// 代理池中的凭据只支持密码认证（ip/用户名/密码三元组）
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            connect_timeout: 10,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl SshConfig {
    /// 从池中凭据构建连接配置
    pub fn from_credential(credential: &Credential, connect_timeout: u64) -> Self {
        Self {
            host: credential.ip.clone(),
            username: credential.username.clone(),
            password: credential.password.clone(),
            connect_timeout,
            ..Self::default()
        }
    }
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
            max_retries: 3,
        }
    }
}

/// russh 客户端配置构建
impl SshConfig {
    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 设置不活动超时（russh 没有单独的 connection_timeout，我们用 inactivity_timeout）
        config.inactivity_timeout = Some(Duration::from_secs(self.connect_timeout));
        // 设置心跳
        if self.keepalive.enabled {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }
}
