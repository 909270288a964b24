// 代理端口实体

use std::collections::BTreeSet;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::credential::CredentialKey;
use crate::constants::{PORT_MAX, PORT_MIN};

/// 本地代理端口绑定
///
/// 不变式: `is_connected == true` 当且仅当 `time_connected` 非空。
/// 所有状态变更只经由 PoolRegistry 的操作集，不直接改字段。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortBinding {
    /// 端口号（唯一，限制在用户端口段）
    pub port_number: u16,
    /// 是否自动重连
    pub auto_connect: bool,
    /// 当前分配的凭据（无分配是合法状态）
    pub ssh: Option<CredentialKey>,
    /// 是否已确认连通
    pub is_connected: bool,
    /// 确认到的出口 IP（未确认时为空）
    pub external_ip: String,
    /// 连通时间（断开时为空）
    pub time_connected: Option<DateTime<Local>>,
    /// 该端口用过的凭据集合（避免立即复用）
    pub used_history: BTreeSet<CredentialKey>,
    /// 是否有检查在途
    pub is_checking: bool,
    /// 上次检查时间
    pub last_checked: Option<DateTime<Local>>,
    /// 上次修改时间
    pub last_modified: DateTime<Local>,
}

impl PortBinding {
    /// 创建新端口绑定，端口号必须在允许范围内
    pub fn new(port_number: u16) -> Option<Self> {
        if !(PORT_MIN..=PORT_MAX).contains(&port_number) {
            return None;
        }
        Some(Self {
            port_number,
            auto_connect: true,
            ssh: None,
            is_connected: false,
            external_ip: String::new(),
            time_connected: None,
            used_history: BTreeSet::new(),
            is_checking: false,
            last_checked: None,
            last_modified: Local::now(),
        })
    }

    /// 是否需要分配凭据
    pub fn need_ssh(&self) -> bool {
        self.ssh.is_none()
    }

    /// 是否需要回收：已分配且连通时间早于给定的过期界限
    /// 已分配但尚未连通的端口由连接路径处理，不算过期
    pub fn need_reset(&self, cutoff: DateTime<Local>) -> bool {
        self.ssh.is_some()
            && self
                .time_connected
                .map(|t| t < cutoff)
                .unwrap_or(false)
    }

    /// 对外暴露的本地代理地址
    #[allow(dead_code)]
    pub fn proxy_address(&self, host: &str) -> String {
        format!("socks5://{}:{}", host, self.port_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_port_range() {
        assert!(PortBinding::new(1023).is_none());
        assert!(PortBinding::new(1024).is_some());
        assert!(PortBinding::new(65353).is_some());
        assert!(PortBinding::new(65354).is_none());
    }

    #[test]
    fn test_need_reset_requires_assignment() {
        let mut port = PortBinding::new(8080).unwrap();
        let cutoff = Local::now();

        // 未分配的端口永远不需要回收
        port.time_connected = Some(cutoff - Duration::hours(1));
        assert!(!port.need_reset(cutoff));

        port.ssh = Some(CredentialKey {
            ip: "10.0.0.5".into(),
            username: "user1".into(),
            password: "pass1".into(),
        });
        assert!(port.need_reset(cutoff));
    }

    #[test]
    fn test_need_reset_cutoff_boundary() {
        let mut port = PortBinding::new(8080).unwrap();
        port.ssh = Some(CredentialKey {
            ip: "10.0.0.5".into(),
            username: "user1".into(),
            password: "pass1".into(),
        });
        let cutoff = Local::now();

        // 在界限或之后连通的不算过期
        port.time_connected = Some(cutoff);
        assert!(!port.need_reset(cutoff));
        port.time_connected = Some(cutoff + Duration::seconds(5));
        assert!(!port.need_reset(cutoff));

        // 早于界限的过期
        port.time_connected = Some(cutoff - Duration::seconds(5));
        assert!(port.need_reset(cutoff));

        // 已分配但从未连通：交给连接路径，不回收
        port.time_connected = None;
        assert!(!port.need_reset(cutoff));
    }

    #[test]
    fn test_proxy_address() {
        let port = PortBinding::new(1337).unwrap();
        assert_eq!(port.proxy_address("127.0.0.1"), "socks5://127.0.0.1:1337");
    }
}
