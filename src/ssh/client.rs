// SSH 客户端核心实现

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use russh::client::Handle;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::config::SshConfig;
use super::error::SshError;
use super::handler::SshClientHandler;

/// SSH 客户端
/// 负责建立 SSH 连接并返回已认证的 Handle
pub struct SshClient {
    /// 连接配置
    config: SshConfig,
}

impl SshClient {
    /// 创建新的 SSH 客户端
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// 执行连接（异步）
    /// 依次完成 TCP 连接、SSH 握手、密码认证
    pub async fn connect(&self) -> Result<Handle<SshClientHandler>, SshError> {
        debug!(
            "[Ssh] Connecting to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );

        // 解析地址
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::Config(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::Config("No valid address found".to_string()))?;

        // TCP 连接
        let connect_timeout = Duration::from_secs(self.config.connect_timeout);
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
            .map_err(SshError::Io)?;

        // SSH 握手
        let russh_config = Arc::new(self.config.to_russh_config());
        let handler = SshClientHandler::new(self.config.host.clone());

        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
        .map_err(SshError::from)?;

        // 密码认证
        self.authenticate(&mut handle).await?;

        debug!(
            "[Ssh] Connection to {}@{} established",
            self.config.username, self.config.host
        );

        Ok(handle)
    }

    /// 执行密码认证
    async fn authenticate(&self, handle: &mut Handle<SshClientHandler>) -> Result<(), SshError> {
        use russh::client::AuthResult;

        let auth_result = handle
            .authenticate_password(&self.config.username, &self.config.password)
            .await
            .map_err(SshError::from)?;

        match auth_result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(SshError::Auth(
                        "Partial authentication - additional auth required".to_string(),
                    ));
                }
                Err(SshError::Auth(format!(
                    "Password authentication failed. Server suggests: {:?}",
                    remaining_methods
                )))
            }
        }
    }
}
