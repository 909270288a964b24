// 后台服务模块
//
// - storage: 本地数据持久化
// - runner: 周期扫描任务

pub mod runner;
pub mod storage;

pub use runner::TaskRunner;
