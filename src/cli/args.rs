//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Host Vitals - 基于SSH的无代理主机监控工具
#[derive(Parser, Debug, Clone)]
#[command(
    name = "host-vitals",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置根目录
    #[arg(
        short = 'c',
        long,
        value_name = "DIR",
        help = "配置根目录（包含 host-vitals.toml、hosts.d、probes.d、scripts）",
        env = "HOST_VITALS_CONFIG"
    )]
    pub config_path: Option<PathBuf>,

    /// 日志级别
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        help = "日志级别",
        env = "HOST_VITALS_LOG_LEVEL"
    )]
    pub log_level: LogLevel,

    /// 日志文件路径
    #[arg(long, value_name = "FILE", help = "日志文件路径")]
    pub log_file: Option<PathBuf>,

    /// 是否输出JSON格式日志
    #[arg(long, help = "输出JSON格式日志")]
    pub json_logs: bool,

    /// 模块级别日志
    #[arg(
        long = "log-module",
        value_name = "MODULE=LEVEL",
        value_parser = parse_module_level,
        help = "单独设置模块的日志级别，可重复（例如 host_vitals::monitor=debug）"
    )]
    pub log_modules: Vec<(String, log::LevelFilter)>,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum LogLevel {
    /// 跟踪级别
    Trace,
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 启动所有主机的监控循环，直到收到关闭信号
    Run,

    /// 测试主机连接（不执行远程命令）
    Check {
        /// 主机名称（可选，不指定则测试所有主机）
        #[arg(value_name = "HOST", help = "主机名称")]
        host: Option<String>,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 验证配置目录
    Validate {
        /// 是否显示详细信息
        #[arg(short, long, help = "显示详细信息")]
        verbose: bool,
    },

    /// 向所有告警通道发送测试消息
    TestNotification {
        /// 测试消息内容
        #[arg(short, long, default_value = "这是一条测试消息", help = "测试消息内容")]
        message: String,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

/// 解析 `模块=级别` 形式的模块日志级别
fn parse_module_level(value: &str) -> Result<(String, log::LevelFilter), String> {
    let (module, level) = value
        .split_once('=')
        .ok_or_else(|| format!("缺少 '=': {}", value))?;
    let module = module.trim();
    if module.is_empty() {
        return Err(format!("模块名称为空: {}", value));
    }
    let level = crate::logging::parse_level(level.trim())
        .ok_or_else(|| format!("无效的日志级别: {}", level))?;
    Ok((module.to_string(), level))
}

impl Args {
    /// 获取配置根目录
    pub fn get_config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(crate::config::loader::get_default_config_path)
    }
}
