//! webhook通知发送器模块
//!
//! 以交互卡片格式POST到webhook，配置了密钥时附带签名

use crate::config::AlertConfig;
use crate::notification::sender::{MessageType, NotificationMessage, NotificationSender};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, error, info};

type HmacSha256 = Hmac<Sha256>;

/// 计算webhook签名
///
/// 以 `timestamp + "\n" + secret` 作为密钥，对空消息做HMAC-SHA256，再做base64编码。
///
/// # 参数
/// * `timestamp` - 秒级时间戳
/// * `secret` - 签名密钥
///
/// # 返回
/// * `Result<String>` - 签名
pub fn sign(timestamp: i64, secret: &str) -> Result<String> {
    let string_to_sign = format!("{}\n{}", timestamp, secret);
    let mac = HmacSha256::new_from_slice(string_to_sign.as_bytes())
        .map_err(|e| anyhow::anyhow!("初始化签名失败: {}", e))?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// webhook通知发送器
pub struct WebhookSender {
    /// 通道名称
    name: String,
    /// HTTP客户端
    client: Client,
    /// webhook URL
    url: String,
    /// 签名密钥
    secret: Option<String>,
}

impl WebhookSender {
    /// 创建新的webhook发送器
    ///
    /// # 参数
    /// * `config` - 告警通道配置
    ///
    /// # 返回
    /// * `Result<Self>` - 发送器实例
    pub fn new(config: &AlertConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("创建HTTP客户端失败")?;

        Ok(Self {
            name: config.name.clone(),
            client,
            url: config.url.clone(),
            secret: config.secret.clone(),
        })
    }

    /// 构建消息体
    fn build_message_body(&self, message: &NotificationMessage) -> Result<Value> {
        let color = match message.message_type {
            MessageType::Alert => "red",
            MessageType::Recovery => "green",
            MessageType::Info => "blue",
        };

        let mut body = json!({
            "msg_type": "interactive",
            "card": {
                "elements": [
                    {
                        "tag": "div",
                        "text": {
                            "content": message.content,
                            "tag": "lark_md"
                        }
                    }
                ],
                "header": {
                    "title": {
                        "content": message.title,
                        "tag": "plain_text"
                    },
                    "template": color
                }
            }
        });

        if let Some(ref secret) = self.secret {
            let timestamp = chrono::Utc::now().timestamp();
            body["timestamp"] = json!(timestamp.to_string());
            body["sign"] = json!(sign(timestamp, secret)?);
        }

        Ok(body)
    }

    /// 发送消息到webhook
    async fn send_to_webhook(&self, body: &Value) -> Result<()> {
        debug!("发送消息到webhook {}: {}", self.name, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("发送webhook消息失败: {}", self.name))?;

        if response.status().is_success() {
            info!("webhook消息发送成功: {}", self.name);
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("webhook消息发送失败 {}: {} - {}", self.name, status, text);
            Err(anyhow::anyhow!("webhook消息发送失败: {}", status))
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, message: &NotificationMessage) -> Result<()> {
        let body = self.build_message_body(message)?;
        self.send_to_webhook(&body).await
    }

    async fn test_connection(&self) -> Result<()> {
        let test_message = NotificationMessage {
            title: "连接测试".to_string(),
            content: "这是一条测试消息，用于验证webhook连接是否正常。".to_string(),
            host_name: "host-vitals".to_string(),
            message_type: MessageType::Info,
        };

        self.send_message(&test_message).await
    }
}
