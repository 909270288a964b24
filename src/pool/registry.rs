// 池注册表
//
// 凭据与端口是系统里唯一的共享可变状态，所有修改都经由这里的
// 窄操作集进入，不变式在这一个收口点维护：
// - is_connected 为真当且仅当 time_connected 非空
// - is_checking 在途期间同一实体不会被并发检查（begin 冲突即报错）
// - 每次写之前都在写锁内重读实体当前值（refresh-before-write）

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{Credential, CredentialKey, PortBinding};

/// 池操作错误
#[derive(Debug, Error)]
pub enum PoolError {
    /// 凭据不存在
    #[error("Unknown credential: {0}")]
    UnknownCredential(CredentialKey),

    /// 端口不存在
    #[error("Unknown port: {0}")]
    UnknownPort(u16),

    /// 端口号超出允许范围
    #[error("Port number out of range: {0}")]
    PortOutOfRange(u16),

    /// 实体已有检查在途（调用方错误，任务分发前应过滤）
    #[error("Check already in flight for {0}")]
    AlreadyChecking(String),

    /// 端口没有分配凭据
    #[error("Port {0} has no assigned credential")]
    Unassigned(u16),
}

/// 持久化快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub credentials: Vec<Credential>,
    pub ports: Vec<PortBinding>,
}

/// 池注册表
/// 锁顺序约定：先 credentials 后 ports，所有方法一致
pub struct PoolRegistry {
    credentials: RwLock<HashMap<CredentialKey, Credential>>,
    ports: RwLock<HashMap<u16, PortBinding>>,
}

impl PoolRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            ports: RwLock::new(HashMap::new()),
        }
    }

    // ======================== 凭据操作 ========================

    /// 批量插入凭据，三元组重复的记录是 no-op
    /// 返回实际新增数量
    pub fn insert_credentials(&self, records: Vec<CredentialKey>) -> usize {
        let mut credentials = self.credentials.write().unwrap();
        let mut inserted = 0;
        for record in records {
            credentials.entry(record.clone()).or_insert_with(|| {
                inserted += 1;
                Credential::new(record.ip, record.username, record.password)
            });
        }
        inserted
    }

    /// 读取单个凭据
    pub fn credential(&self, key: &CredentialKey) -> Option<Credential> {
        self.credentials.read().unwrap().get(key).cloned()
    }

    /// 读取全部凭据（按标识排序，便于稳定遍历）
    pub fn credentials(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.credentials.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        all
    }

    /// 标记凭据存活
    #[allow(dead_code)]
    pub fn mark_alive(&self, key: &CredentialKey) -> Result<(), PoolError> {
        self.set_liveness(key, true)
    }

    /// 标记凭据死亡
    #[allow(dead_code)]
    pub fn mark_dead(&self, key: &CredentialKey) -> Result<(), PoolError> {
        self.set_liveness(key, false)
    }

    fn set_liveness(&self, key: &CredentialKey, is_live: bool) -> Result<(), PoolError> {
        let mut credentials = self.credentials.write().unwrap();
        let credential = credentials
            .get_mut(key)
            .ok_or_else(|| PoolError::UnknownCredential(key.clone()))?;
        credential.is_live = is_live;
        let now = Local::now();
        credential.last_checked = Some(now);
        credential.last_modified = now;
        Ok(())
    }

    /// 开始检查凭据
    /// 在途冲突是调用方错误，这里大声失败而不是悄悄覆盖状态
    pub fn begin_checking_credential(&self, key: &CredentialKey) -> Result<(), PoolError> {
        let mut credentials = self.credentials.write().unwrap();
        let credential = credentials
            .get_mut(key)
            .ok_or_else(|| PoolError::UnknownCredential(key.clone()))?;
        if credential.is_checking {
            return Err(PoolError::AlreadyChecking(key.to_string()));
        }
        credential.is_checking = true;
        credential.last_modified = Local::now();
        Ok(())
    }

    /// 结束检查凭据并写入本轮的存活判定
    pub fn end_checking_credential(
        &self,
        key: &CredentialKey,
        is_live: bool,
    ) -> Result<(), PoolError> {
        let mut credentials = self.credentials.write().unwrap();
        let credential = credentials
            .get_mut(key)
            .ok_or_else(|| PoolError::UnknownCredential(key.clone()))?;
        credential.is_live = is_live;
        credential.is_checking = false;
        let now = Local::now();
        credential.last_checked = Some(now);
        credential.last_modified = now;
        Ok(())
    }

    // ======================== 端口操作 ========================

    /// 确保配置的端口都存在，返回新建数量
    pub fn ensure_ports(&self, numbers: &[u16]) -> Result<usize, PoolError> {
        let mut ports = self.ports.write().unwrap();
        let mut created = 0;
        for &number in numbers {
            if ports.contains_key(&number) {
                continue;
            }
            let binding =
                PortBinding::new(number).ok_or(PoolError::PortOutOfRange(number))?;
            ports.insert(number, binding);
            created += 1;
        }
        Ok(created)
    }

    /// 读取单个端口
    pub fn port(&self, number: u16) -> Option<PortBinding> {
        self.ports.read().unwrap().get(&number).cloned()
    }

    /// 读取全部端口（按端口号排序）
    pub fn ports(&self) -> Vec<PortBinding> {
        let mut all: Vec<PortBinding> = self.ports.read().unwrap().values().cloned().collect();
        all.sort_by_key(|p| p.port_number);
        all
    }

    /// 未分配或已过期需要回收的端口
    #[allow(dead_code)]
    pub fn select_unassigned_or_stale(&self, cutoff: DateTime<Local>) -> Vec<u16> {
        let mut selected: Vec<u16> = self
            .ports
            .read()
            .unwrap()
            .values()
            .filter(|p| p.need_ssh() || p.need_reset(cutoff))
            .map(|p| p.port_number)
            .collect();
        selected.sort_unstable();
        selected
    }

    /// 开始检查端口
    pub fn begin_checking_port(&self, number: u16) -> Result<(), PoolError> {
        let mut ports = self.ports.write().unwrap();
        let port = ports.get_mut(&number).ok_or(PoolError::UnknownPort(number))?;
        if port.is_checking {
            return Err(PoolError::AlreadyChecking(format!("port {}", number)));
        }
        port.is_checking = true;
        port.last_modified = Local::now();
        Ok(())
    }

    /// 结束检查端口
    pub fn end_checking_port(&self, number: u16) -> Result<(), PoolError> {
        let mut ports = self.ports.write().unwrap();
        let port = ports.get_mut(&number).ok_or(PoolError::UnknownPort(number))?;
        port.is_checking = false;
        let now = Local::now();
        port.last_checked = Some(now);
        port.last_modified = now;
        Ok(())
    }

    /// 设置（或清除）端口的凭据分配
    /// 刚（重新）分配的端口尚未确认连通，connected 一律清掉
    pub fn assign(&self, number: u16, ssh: Option<CredentialKey>) -> Result<(), PoolError> {
        let credentials = self.credentials.read().unwrap();
        if let Some(key) = &ssh {
            if !credentials.contains_key(key) {
                return Err(PoolError::UnknownCredential(key.clone()));
            }
        }
        let mut ports = self.ports.write().unwrap();
        let port = ports.get_mut(&number).ok_or(PoolError::UnknownPort(number))?;
        debug!("[Registry] Port {} assigned to {:?}", number, ssh.as_ref().map(|k| k.to_string()));
        port.ssh = ssh;
        port.is_connected = false;
        port.time_connected = None;
        port.last_modified = Local::now();
        Ok(())
    }

    /// 标记端口已确认连通
    /// 连通时把当前凭据并入端口的使用历史（幂等），并维护反向索引
    pub fn mark_connected(&self, number: u16, external_ip: &str) -> Result<(), PoolError> {
        let mut credentials = self.credentials.write().unwrap();
        let mut ports = self.ports.write().unwrap();
        let port = ports.get_mut(&number).ok_or(PoolError::UnknownPort(number))?;
        let key = port.ssh.clone().ok_or(PoolError::Unassigned(number))?;

        port.is_connected = true;
        // 重复确认保留首次连通时间
        port.time_connected = Some(port.time_connected.unwrap_or_else(Local::now));
        port.external_ip = external_ip.to_string();
        port.used_history.insert(key.clone());
        port.last_modified = Local::now();

        if let Some(credential) = credentials.get_mut(&key) {
            credential.used_by_ports.insert(number);
            credential.last_modified = Local::now();
        }
        Ok(())
    }

    /// 标记端口断开
    pub fn mark_disconnected(&self, number: u16) -> Result<(), PoolError> {
        let mut ports = self.ports.write().unwrap();
        let port = ports.get_mut(&number).ok_or(PoolError::UnknownPort(number))?;
        port.is_connected = false;
        port.time_connected = None;
        port.last_modified = Local::now();
        Ok(())
    }

    /// 重置端口：清除分配、连接状态与确认 IP
    /// remove_from_history 为真时同时清空使用历史（操作者要求“忘掉之前的失败”）
    #[allow(dead_code)]
    pub fn reset(&self, number: u16, remove_from_history: bool) -> Result<(), PoolError> {
        let mut ports = self.ports.write().unwrap();
        let port = ports.get_mut(&number).ok_or(PoolError::UnknownPort(number))?;
        port.ssh = None;
        port.is_connected = false;
        port.time_connected = None;
        port.external_ip.clear();
        port.is_checking = false;
        port.last_checked = None;
        if remove_from_history {
            port.used_history.clear();
        }
        port.last_modified = Local::now();
        Ok(())
    }

    // ======================== 快照 ========================

    /// 导出持久化快照
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            credentials: self.credentials(),
            ports: self.ports(),
        }
    }

    /// 从快照恢复
    /// 上个进程遗留的在途检查标记在这里清掉
    pub fn restore(&self, snapshot: PoolSnapshot) {
        let mut credentials = self.credentials.write().unwrap();
        let mut ports = self.ports.write().unwrap();
        credentials.clear();
        ports.clear();
        for mut credential in snapshot.credentials {
            credential.is_checking = false;
            credential.last_checked = None;
            credentials.insert(credential.key(), credential);
        }
        for mut port in snapshot.ports {
            port.is_checking = false;
            port.last_checked = None;
            ports.insert(port.port_number, port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(ip: &str) -> CredentialKey {
        CredentialKey {
            ip: ip.to_string(),
            username: "user1".to_string(),
            password: "pass1".to_string(),
        }
    }

    fn registry_with(port: u16, ips: &[&str]) -> PoolRegistry {
        let registry = PoolRegistry::new();
        registry.ensure_ports(&[port]).unwrap();
        registry.insert_credentials(ips.iter().map(|ip| key(ip)).collect());
        registry
    }

    /// 不变式：connected 为真当且仅当 time_connected 非空
    fn assert_connection_invariant(registry: &PoolRegistry, number: u16) {
        let port = registry.port(number).unwrap();
        assert_eq!(port.is_connected, port.time_connected.is_some());
    }

    #[test]
    fn test_insert_credentials_deduplicates() {
        let registry = PoolRegistry::new();
        assert_eq!(registry.insert_credentials(vec![key("10.0.0.1")]), 1);
        assert_eq!(registry.insert_credentials(vec![key("10.0.0.1")]), 0);
        assert_eq!(registry.credentials().len(), 1);
    }

    #[test]
    fn test_begin_checking_twice_fails_loudly() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        let k = key("10.0.0.1");
        registry.begin_checking_credential(&k).unwrap();
        assert!(matches!(
            registry.begin_checking_credential(&k),
            Err(PoolError::AlreadyChecking(_))
        ));
        registry.end_checking_credential(&k, true).unwrap();
        registry.begin_checking_credential(&k).unwrap();

        registry.begin_checking_port(8080).unwrap();
        assert!(matches!(
            registry.begin_checking_port(8080),
            Err(PoolError::AlreadyChecking(_))
        ));
    }

    #[test]
    fn test_end_checking_records_liveness() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        let k = key("10.0.0.1");
        registry.begin_checking_credential(&k).unwrap();
        registry.end_checking_credential(&k, true).unwrap();
        let credential = registry.credential(&k).unwrap();
        assert!(credential.is_live);
        assert!(!credential.is_checking);
        assert!(credential.last_checked.is_some());
    }

    #[test]
    fn test_connection_invariant_through_lifecycle() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        assert_connection_invariant(&registry, 8080);

        registry.assign(8080, Some(key("10.0.0.1"))).unwrap();
        assert_connection_invariant(&registry, 8080);

        registry.mark_connected(8080, "1.2.3.4").unwrap();
        assert_connection_invariant(&registry, 8080);

        registry.mark_disconnected(8080).unwrap();
        assert_connection_invariant(&registry, 8080);

        registry.reset(8080, false).unwrap();
        assert_connection_invariant(&registry, 8080);
    }

    #[test]
    fn test_mark_connected_requires_assignment() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        assert!(matches!(
            registry.mark_connected(8080, "1.2.3.4"),
            Err(PoolError::Unassigned(8080))
        ));
    }

    #[test]
    fn test_mark_connected_is_idempotent_for_history() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        registry.assign(8080, Some(key("10.0.0.1"))).unwrap();
        registry.mark_connected(8080, "1.2.3.4").unwrap();
        let first_connected = registry.port(8080).unwrap().time_connected;
        registry.mark_connected(8080, "1.2.3.4").unwrap();

        let port = registry.port(8080).unwrap();
        assert_eq!(port.used_history.len(), 1);
        // 重复确认不刷新首次连通时间
        assert_eq!(port.time_connected, first_connected);

        let credential = registry.credential(&key("10.0.0.1")).unwrap();
        assert_eq!(credential.used_by_ports.len(), 1);
        assert!(credential.used_by_ports.contains(&8080));
    }

    #[test]
    fn test_reset_preserves_history_by_default() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        registry.assign(8080, Some(key("10.0.0.1"))).unwrap();
        registry.mark_connected(8080, "1.2.3.4").unwrap();

        registry.reset(8080, false).unwrap();
        let port = registry.port(8080).unwrap();
        assert!(port.ssh.is_none());
        assert!(!port.is_connected);
        assert!(port.time_connected.is_none());
        assert_eq!(port.external_ip, "");
        assert_eq!(port.used_history.len(), 1);
    }

    #[test]
    fn test_reset_can_forget_history() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        registry.assign(8080, Some(key("10.0.0.1"))).unwrap();
        registry.mark_connected(8080, "1.2.3.4").unwrap();

        registry.reset(8080, true).unwrap();
        assert!(registry.port(8080).unwrap().used_history.is_empty());
    }

    #[test]
    fn test_select_unassigned_or_stale() {
        let registry = PoolRegistry::new();
        registry.ensure_ports(&[8080, 8081, 8082]).unwrap();
        registry.insert_credentials(vec![key("10.0.0.1"), key("10.0.0.2")]);

        // 8080 未分配；8081 连通且新鲜；8082 连通但已过期
        registry.assign(8081, Some(key("10.0.0.1"))).unwrap();
        registry.mark_connected(8081, "1.1.1.1").unwrap();
        registry.assign(8082, Some(key("10.0.0.2"))).unwrap();
        registry.mark_connected(8082, "2.2.2.2").unwrap();

        let fresh_cutoff = Local::now() - Duration::hours(1);
        assert_eq!(registry.select_unassigned_or_stale(fresh_cutoff), vec![8080]);

        let stale_cutoff = Local::now() + Duration::hours(1);
        assert_eq!(
            registry.select_unassigned_or_stale(stale_cutoff),
            vec![8080, 8081, 8082]
        );
    }

    #[test]
    fn test_ensure_ports_rejects_out_of_range() {
        let registry = PoolRegistry::new();
        assert!(matches!(
            registry.ensure_ports(&[80]),
            Err(PoolError::PortOutOfRange(80))
        ));
    }

    #[test]
    fn test_restore_clears_stale_checking_flags() {
        let registry = registry_with(8080, &["10.0.0.1"]);
        registry.begin_checking_credential(&key("10.0.0.1")).unwrap();
        registry.begin_checking_port(8080).unwrap();

        let snapshot = registry.snapshot();
        let restored = PoolRegistry::new();
        restored.restore(snapshot);

        assert!(!restored.credential(&key("10.0.0.1")).unwrap().is_checking);
        assert!(!restored.port(8080).unwrap().is_checking);
    }
}
