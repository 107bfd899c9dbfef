//! 通知发送器模块
//!
//! 定义通知发送的trait和基础实现

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// 通知消息结构
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    /// 消息标题
    pub title: String,
    /// 消息内容
    pub content: String,
    /// 主机名称
    pub host_name: String,
    /// 消息类型
    pub message_type: MessageType,
}

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// 告警消息
    Alert,
    /// 恢复消息
    Recovery,
    /// 信息消息
    Info,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Alert => write!(f, "告警"),
            MessageType::Recovery => write!(f, "恢复"),
            MessageType::Info => write!(f, "信息"),
        }
    }
}

/// 通知发送器trait
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 发送者名称
    fn name(&self) -> &str;

    /// 发送消息
    ///
    /// # 参数
    /// * `message` - 通知消息
    ///
    /// # 返回
    /// * `Result<()>` - 发送结果
    async fn send_message(&self, message: &NotificationMessage) -> Result<()>;

    /// 测试连接
    ///
    /// # 返回
    /// * `Result<()>` - 测试结果
    async fn test_connection(&self) -> Result<()>;
}

/// 写入日志的通知发送器，没有配置其他通知渠道时使用
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_message(&self, message: &NotificationMessage) -> Result<()> {
        match message.message_type {
            MessageType::Alert => error!(
                host = %message.host_name,
                "{}\n{}", message.title, message.content
            ),
            MessageType::Recovery => warn!(
                host = %message.host_name,
                "{}\n{}", message.title, message.content
            ),
            MessageType::Info => info!(
                host = %message.host_name,
                "{}\n{}", message.title, message.content
            ),
        }
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        let sender = LogSender;
        let message = NotificationMessage {
            title: "t".to_string(),
            content: "c".to_string(),
            host_name: "web-01".to_string(),
            message_type: MessageType::Alert,
        };
        assert!(sender.send_message(&message).await.is_ok());
        assert!(sender.test_connection().await.is_ok());
        assert_eq!(sender.name(), "log");
    }

    #[test]
    fn test_message_type_serializes_lowercase() {
        let value = serde_json::to_value(MessageType::Recovery).unwrap();
        assert_eq!(value, "recovery");
    }
}
