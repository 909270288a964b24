// 池常量定义

/// 出口 IP 回显端点
/// 至少两个独立服务，探测时并发竞速，单点故障不影响确认
pub const PROBE_ENDPOINTS: [&str; 2] = [
    "https://api.ipify.org?format=text",
    "https://ip.seeip.org",
];

/// 受管端口允许范围（用户/临时端口段）
pub const PORT_MIN: u16 = 1024;
pub const PORT_MAX: u16 = 65353;

/// 探测时访问本地代理使用的主机
pub const LOCAL_PROBE_HOST: &str = "127.0.0.1";

/// 配置目录名
pub const CONFIG_DIR: &str = "sshpool";
/// 设置文件名
pub const SETTINGS_FILE: &str = "settings.json";
/// 池状态快照文件名
pub const POOL_FILE: &str = "pool.json";
