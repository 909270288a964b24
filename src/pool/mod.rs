// 代理池引擎模块
//
// - registry: 池注册表（凭据/端口的唯一共享状态）
// - assign: 凭据分配引擎
// - racer: 并发探测竞速原语
// - checker: 健康检查器

pub mod assign;
pub mod checker;
pub mod racer;
pub mod registry;

pub use assign::select_credential_for;
pub use checker::HealthChecker;
pub use racer::{race_first_success, RaceError};
pub use registry::{PoolError, PoolRegistry, PoolSnapshot};
