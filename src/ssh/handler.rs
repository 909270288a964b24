// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::future::Future;

use russh::keys::PublicKey;
use tracing::debug;

/// SSH 客户端 Handler
/// 处理 SSH 连接过程中的各种回调
pub struct SshClientHandler {
    /// 服务器主机名（用于日志）
    host: String,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String) -> Self {
        Self { host }
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    /// 池中的上游主机来自批量导入的凭据列表，这里接受所有公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);
        debug!("[Ssh] {} server key fingerprint: {}", self.host, fingerprint);

        async { Ok(true) }
    }
}
