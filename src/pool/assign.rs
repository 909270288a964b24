// 凭据分配引擎
//
// 为需要凭据的端口挑选一个存活、且（默认）该端口没用过的凭据。
// 候选之间均匀随机，不做延迟/质量排序

use rand::seq::SliceRandom;
use tracing::debug;

use super::registry::{PoolError, PoolRegistry};
use crate::models::CredentialKey;

/// 为端口挑选可用凭据
///
/// require_unique 为真时排除端口使用历史里的凭据（默认策略：
/// 之前在该端口上失败/断开过的凭据不立刻重试，避免对着死上游空转）。
/// 候选为空返回 None——这不是错误，表示“现在没有合适的凭据”，
/// 调用方等下一轮扫描或显式放宽 require_unique。
pub fn select_credential_for(
    registry: &PoolRegistry,
    port_number: u16,
    require_unique: bool,
) -> Result<Option<CredentialKey>, PoolError> {
    let port = registry
        .port(port_number)
        .ok_or(PoolError::UnknownPort(port_number))?;

    let candidates: Vec<CredentialKey> = registry
        .credentials()
        .into_iter()
        .filter(|c| c.is_live)
        .map(|c| c.key())
        .filter(|key| !require_unique || !port.used_history.contains(key))
        .collect();

    let picked = candidates.choose(&mut rand::thread_rng()).cloned();
    if picked.is_none() {
        debug!(
            "[Assign] No eligible credential for port {} (unique={})",
            port_number, require_unique
        );
    }
    Ok(picked)
}
