// 数据模型模块
//
// - credential: SSH 凭据实体
// - port: 代理端口实体
// - import: 凭据列表批量导入解析
// - settings: 应用设置

pub mod credential;
pub mod import;
pub mod port;
pub mod settings;

pub use credential::{Credential, CredentialKey};
pub use import::parse_credential_list;
pub use port::PortBinding;
pub use settings::AppSettings;
