//! Host Vitals - 基于SSH的无代理主机监控工具
//!
//! 这是一个用Rust编写的主机监控工具，支持：
//! - 按标签表达式把探针匹配到主机
//! - 每台主机独立的一分钟调度循环
//! - 通过SSH批量执行探针脚本
//! - 失败登记、告警和恢复通知
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod signal;

// 重新导出主要类型
pub use config::{ConfigTree, GlobalConfig, HostConfig, ProbeConfig};
pub use error::HostVitalsError;
pub use monitor::{FailureRegistry, Host, HostScheduler, Probe, Run, RunExecutor, Task};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
