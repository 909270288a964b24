// SSH 凭据实体

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 凭据标识
/// (ip, username, password) 三元组联合唯一
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CredentialKey {
    pub ip: String,
    pub username: String,
    pub password: String,
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 日志里不输出密码
        write!(f, "{}@{}", self.username, self.ip)
    }
}

/// SSH 凭据
/// 由批量导入创建，存活状态在每轮健康扫描中重新评估；只标记死活，从不删除
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub ip: String,
    pub username: String,
    pub password: String,
    /// 当前是否可认证成功
    pub is_live: bool,
    /// 是否有检查在途（在途期间归该检查独占）
    pub is_checking: bool,
    /// 上次检查时间
    pub last_checked: Option<DateTime<Local>>,
    /// 上次修改时间
    pub last_modified: DateTime<Local>,
    /// 曾绑定过该凭据的端口（反向索引）
    pub used_by_ports: BTreeSet<u16>,
}

impl Credential {
    /// 创建新凭据（初始视为未存活，等待首轮检查）
    pub fn new(ip: String, username: String, password: String) -> Self {
        Self {
            ip,
            username,
            password,
            is_live: false,
            is_checking: false,
            last_checked: None,
            last_modified: Local::now(),
            used_by_ports: BTreeSet::new(),
        }
    }

    /// 凭据标识三元组
    pub fn key(&self) -> CredentialKey {
        CredentialKey {
            ip: self.ip.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}
