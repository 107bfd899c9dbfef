//! 配置管理模块
//!
//! 提供根配置、主机声明和探针声明的解析与验证功能

pub mod loader;
pub mod types;

// 重新导出主要类型
pub use loader::{ConfigLoader, ConfigTree, LoadedProbe, TomlConfigLoader};
pub use types::{AlertConfig, CheckConfig, GlobalConfig, HostConfig, NetworkConfig, ProbeConfig};
