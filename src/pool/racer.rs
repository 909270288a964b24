// 并发探测竞速原语
//
// 多个操作并发执行，第一个成功的结果立即返回；
// 其余在途操作不强行取消，留在后台跑完后丢弃结果，
// 避免在连接半建立状态下强拆导致的清理竞态

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;

/// 竞速失败
#[derive(Debug, Error)]
pub enum RaceError<E> {
    /// 所有操作都失败，携带最后观察到的失败
    #[error("All operations failed")]
    Failed(#[source] E),

    /// 最后观察到的失败是取消（或没有任何操作），按超时上报，
    /// 区分“调用方取消了我们”和“全部真实失败”
    #[error("Operation race timed out")]
    Timeout,
}

/// 等待第一个成功结果
///
/// 入参是已经 spawn 出去的任务句柄；返回第一个 Ok 的值，
/// 剩余任务的句柄被丢弃（任务继续后台运行，结果无人接收）。
/// 全部失败时返回最后一个失败；若最后的失败是任务被取消，返回 Timeout。
pub async fn race_first_success<T, E>(
    handles: impl IntoIterator<Item = JoinHandle<Result<T, E>>>,
) -> Result<T, RaceError<E>>
where
    T: Send + 'static,
    E: std::error::Error + Send + 'static,
{
    enum LastFailure<E> {
        None,
        Error(E),
        Cancelled,
    }

    let mut pending: FuturesUnordered<JoinHandle<Result<T, E>>> =
        handles.into_iter().collect();
    let mut last = LastFailure::None;

    while let Some(joined) = pending.next().await {
        match joined {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last = LastFailure::Error(e),
            // 任务被取消或 panic：没有可携带的错误值
            Err(_) => last = LastFailure::Cancelled,
        }
    }

    match last {
        LastFailure::Error(e) => Err(RaceError::Failed(e)),
        LastFailure::Cancelled | LastFailure::None => Err(RaceError::Timeout),
    }
}
