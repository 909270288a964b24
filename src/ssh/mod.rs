// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, KeepaliveConfig)
// - error: 错误类型 (SshError)
// - handler: russh Handler 实现
// - client: SSH 客户端核心
// - tunnel: 本地 SOCKS5 隧道 (Dialer, TunnelManager)

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod tunnel;

// 公开导出
pub use client::SshClient;
pub use config::{KeepaliveConfig, SshConfig};
pub use error::SshError;
pub use tunnel::{Dialer, SshDialer, TunnelManager};
