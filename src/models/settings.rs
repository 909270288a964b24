// 应用设置

use serde::{Deserialize, Serialize};

/// 应用设置
/// 持久化为 JSON，缺省字段取默认值
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 扫描间隔（秒）
    pub sweep_interval_secs: u64,
    /// SSH 连接超时（秒）
    pub ssh_connect_timeout_secs: u64,
    /// 出口 IP 探测超时（秒）
    pub probe_timeout_secs: u64,
    /// 探测重试次数（在竞速一轮全失败之后）
    pub probe_retries: u32,
    /// 连通多久后视为过期需要回收（秒）
    pub stale_after_secs: i64,
    /// 凭据检查并发上限
    pub ssh_check_concurrency: usize,
    /// 端口检查并发上限
    pub port_check_concurrency: usize,
    /// 本地 SOCKS5 监听地址
    pub bind_host: String,
    /// 受管端口列表
    pub ports: Vec<u16>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            ssh_connect_timeout_secs: 10,
            probe_timeout_secs: 10,
            probe_retries: 2,
            stale_after_secs: 600,
            ssh_check_concurrency: 16,
            port_check_concurrency: 8,
            bind_host: "0.0.0.0".to_string(),
            ports: vec![],
        }
    }
}
