// 本地 SOCKS5 隧道模块
//
// 每个受管端口在本地监听 SOCKS5 CONNECT 请求，
// 将客户端流量经 SSH direct-tcpip 通道转发到上游

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::SshError;
use super::handler::SshClientHandler;

// SOCKS5 协议常量
const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCEEDED: u8 = 0x00;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// 上游拨号接口
/// 生产实现经 SSH 通道拨号，测试可以注入本地回环实现
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self, host: &str, port: u16) -> Result<Self::Stream, SshError>;
}

/// 经 SSH direct-tcpip 通道拨号
pub struct SshDialer {
    handle: Arc<Handle<SshClientHandler>>,
}

impl SshDialer {
    /// 包装已认证的 SSH Handle
    pub fn new(handle: Handle<SshClientHandler>) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }
}

#[async_trait]
impl Dialer for SshDialer {
    type Stream = russh::ChannelStream<Msg>;

    async fn dial(&self, host: &str, port: u16) -> Result<Self::Stream, SshError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;
        Ok(channel.into_stream())
    }
}

/// 运行中的隧道
struct TunnelHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// 隧道管理器
/// 以端口号为键管理所有本地 SOCKS5 监听器
pub struct TunnelManager {
    tunnels: RwLock<HashMap<u16, TunnelHandle>>,
}

impl TunnelManager {
    /// 创建隧道管理器
    pub fn new() -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
        }
    }

    /// 隧道是否仍在运行
    pub fn is_running(&self, port: u16) -> bool {
        self.tunnels
            .read()
            .unwrap()
            .get(&port)
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    /// 启动端口的 SOCKS5 监听器
    /// 同端口的旧隧道会先被停掉（重新分配凭据时复用端口）
    pub async fn start<D: Dialer>(
        &self,
        port: u16,
        bind_host: &str,
        dialer: D,
    ) -> Result<(), SshError> {
        self.stop(port);

        let listener = TcpListener::bind((bind_host, port))
            .await
            .map_err(|e| SshError::Tunnel(format!("Failed to bind {}:{}: {}", bind_host, port, e)))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(serve(listener, port, Arc::new(dialer), stop_rx));

        self.tunnels
            .write()
            .unwrap()
            .insert(port, TunnelHandle { stop_tx, task });
        Ok(())
    }

    /// 停止端口的隧道并清理资源
    pub fn stop(&self, port: u16) {
        if let Some(handle) = self.tunnels.write().unwrap().remove(&port) {
            let _ = handle.stop_tx.send(true);
            handle.task.abort();
            info!("[Tunnel] Listener on port {} stopped", port);
        }
    }

    /// 停止所有隧道
    pub fn stop_all(&self) {
        let ports: Vec<u16> = self.tunnels.read().unwrap().keys().copied().collect();
        for port in ports {
            self.stop(port);
        }
    }
}

/// 监听循环
/// 每个入站连接单独起任务处理，accept 失败退避后继续
async fn serve<D: Dialer>(
    listener: TcpListener,
    port: u16,
    dialer: Arc<D>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!("[Tunnel] SOCKS5 listening on port {}", port);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("[Tunnel] Incoming connection from {} on port {}", peer, port);
                    let dialer = dialer.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, dialer).await {
                            debug!("[Tunnel] Client on port {} closed: {}", port, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("[Tunnel] Accept error on port {}: {}", port, e);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    info!("[Tunnel] Listener loop on port {} exited", port);
}

/// 处理单个 SOCKS5 客户端
/// 只支持无认证 + CONNECT 命令，协商完成后双向转发
async fn handle_client<D: Dialer>(mut stream: TcpStream, dialer: Arc<D>) -> Result<(), SshError> {
    // 方法协商
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(SshError::Tunnel(format!(
            "Unsupported SOCKS version: {}",
            version
        )));
    }
    let method_count = stream.read_u8().await? as usize;
    let mut methods = vec![0u8; method_count];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        stream
            .write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE])
            .await?;
        return Err(SshError::Tunnel("No acceptable auth method".to_string()));
    }
    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;

    // 请求解析
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [_, command, _, address_type] = header;

    if command != CMD_CONNECT {
        write_reply(&mut stream, REP_COMMAND_NOT_SUPPORTED).await?;
        return Err(SshError::Tunnel(format!(
            "Unsupported SOCKS command: {}",
            command
        )));
    }

    let target_host = match address_type {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        other => {
            write_reply(&mut stream, REP_COMMAND_NOT_SUPPORTED).await?;
            return Err(SshError::Tunnel(format!(
                "Unsupported address type: {}",
                other
            )));
        }
    };
    let target_port = stream.read_u16().await?;

    // 经 SSH 通道拨号上游
    let mut upstream = match dialer.dial(&target_host, target_port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            write_reply(&mut stream, REP_HOST_UNREACHABLE).await?;
            return Err(e);
        }
    };
    write_reply(&mut stream, REP_SUCCEEDED).await?;

    // 双向转发直到任一侧关闭
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
    Ok(())
}

/// 发送 SOCKS5 应答（绑定地址固定回 0.0.0.0:0）
async fn write_reply(stream: &mut TcpStream, reply: u8) -> Result<(), SshError> {
    stream
        .write_all(&[SOCKS_VERSION, reply, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}
