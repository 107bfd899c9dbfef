//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use std::time::Duration;
use thiserror::Error;

/// Host Vitals 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum HostVitalsError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 远程连接相关错误
    #[error("连接错误: {0}")]
    Connection(#[from] ConnectionError),

    /// 通知相关错误
    #[error("通知错误: {0}")]
    Notification(#[from] NotificationError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },

    /// 配置目录无效
    #[error("无效的目录 '{path}': {reason}")]
    InvalidDirectory { path: String, reason: String },

    /// 单个声明文件解码失败
    #[error("解码 {path} 失败: {reason}")]
    DecodeError { path: String, reason: String },

    /// 主机或探针名称重复
    #[error("重复的{kind}名称 '{name}' ({first}, {second})")]
    DuplicateName {
        kind: &'static str,
        name: String,
        first: String,
        second: String,
    },
}

/// 远程连接错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// 建立连接失败
    #[error("连接 {target} 失败: {reason}")]
    ConnectFailed { target: String, reason: String },

    /// 连接超时
    #[error("SSH连接超时 (after {0:?})")]
    Timeout(Duration),

    /// 连接建立耗时超过告警阈值
    #[error("SSH连接时间过长: {dial:?} (ssh_connection_time_warn = {warn:?})")]
    SlowConnection { dial: Duration, warn: Duration },

    /// 会话准备失败
    #[error("会话准备失败: {0}")]
    Session(String),

    /// 远程命令执行失败
    #[error("远程命令执行失败: {0}")]
    Command(String),

    /// 尚未建立连接
    #[error("尚未建立连接")]
    NotConnected,
}

/// 通知错误类型
#[derive(Error, Debug)]
pub enum NotificationError {
    /// 发送失败
    #[error("通知发送失败: {0}")]
    SendError(String),

    /// 模板渲染错误
    #[error("模板渲染失败: {0}")]
    TemplateError(String),

    /// 配置错误
    #[error("通知配置错误: {0}")]
    ConfigError(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, HostVitalsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_mentions_both_files() {
        let err = ConfigError::DuplicateName {
            kind: "主机",
            name: "web-01".to_string(),
            first: "hosts.d/a.toml".to_string(),
            second: "hosts.d/b.toml".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("web-01"));
        assert!(msg.contains("hosts.d/a.toml"));
        assert!(msg.contains("hosts.d/b.toml"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: HostVitalsError = ConfigError::ParseError("bad".to_string()).into();
        assert!(matches!(err, HostVitalsError::Config(_)));
    }
}
