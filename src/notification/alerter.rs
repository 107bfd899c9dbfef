//! 告警分发模块
//!
//! 调度器在每次运行结束后调用 [`Alerter`]，告警器负责全部外部通知，
//! 不向调度器返回错误。

use crate::config::GlobalConfig;
use crate::monitor::failures::{CurrentFail, FailureDelta};
use crate::monitor::run::Run;
use crate::notification::sender::{
    LogSender, MessageType, NotificationMessage, NotificationSender,
};
use crate::notification::template::{FailureView, MessageTemplates, TemplateContext};
use crate::notification::webhook::WebhookSender;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// 告警器trait
#[async_trait]
pub trait Alerter: Send + Sync {
    /// 处理一次完成的运行
    ///
    /// # 参数
    /// * `host` - 主机名称
    /// * `run` - 运行记录
    /// * `delta` - 失败登记的变化
    async fn alert(&self, host: &str, run: &Run, delta: &FailureDelta);
}

/// 把失败登记的变化渲染成消息并发送到所有通知渠道
pub struct AlertDispatcher {
    templates: MessageTemplates,
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl AlertDispatcher {
    /// 创建告警分发器
    pub fn new(templates: MessageTemplates, senders: Vec<Arc<dyn NotificationSender>>) -> Self {
        Self { templates, senders }
    }

    /// 根据全局配置创建告警分发器
    ///
    /// 每个启用的 `[[alerts]]` 创建一个webhook发送器；没有启用的通道时写入日志。
    ///
    /// # 参数
    /// * `global` - 全局配置
    ///
    /// # 返回
    /// * `Result<Self>` - 分发器实例
    pub fn from_config(global: &GlobalConfig) -> Result<Self> {
        let templates = MessageTemplates::new(
            global.alert_template.as_deref(),
            global.recovery_template.as_deref(),
        )?;

        let mut senders: Vec<Arc<dyn NotificationSender>> = Vec::new();
        for alert in global.alerts.iter().filter(|a| a.enabled) {
            senders.push(Arc::new(WebhookSender::new(alert)?));
        }
        if senders.is_empty() {
            senders.push(Arc::new(LogSender));
        }

        Ok(Self::new(templates, senders))
    }

    /// 通知渠道
    pub fn senders(&self) -> &[Arc<dyn NotificationSender>] {
        &self.senders
    }

    /// 根据失败登记的变化生成消息
    ///
    /// # 参数
    /// * `host` - 主机名称
    /// * `run` - 运行记录
    /// * `delta` - 失败登记的变化
    ///
    /// # 返回
    /// * `Vec<NotificationMessage>` - 告警消息在前，恢复消息在后
    pub fn build_messages(
        &self,
        host: &str,
        run: &Run,
        delta: &FailureDelta,
    ) -> Vec<NotificationMessage> {
        let mut messages = Vec::new();

        if !delta.new.is_empty() {
            let context = self.context(host, run, &delta.new);
            let content = self
                .templates
                .render_alert(&context)
                .unwrap_or_else(|e| {
                    error!("渲染告警消息失败: {}", e);
                    plain_text(&delta.new)
                });
            messages.push(NotificationMessage {
                title: format!("🚨 主机告警 - {}", host),
                content,
                host_name: host.to_string(),
                message_type: MessageType::Alert,
            });
        }

        if !delta.resolved.is_empty() {
            let context = self.context(host, run, &delta.resolved);
            let content = self
                .templates
                .render_recovery(&context)
                .unwrap_or_else(|e| {
                    error!("渲染恢复消息失败: {}", e);
                    plain_text(&delta.resolved)
                });
            messages.push(NotificationMessage {
                title: format!("✅ 主机恢复 - {}", host),
                content,
                host_name: host.to_string(),
                message_type: MessageType::Recovery,
            });
        }

        messages
    }

    fn context(&self, host: &str, run: &Run, fails: &[CurrentFail]) -> TemplateContext {
        TemplateContext {
            host_name: host.to_string(),
            run_id: run.id.to_string(),
            timestamp: run.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration_ms: run.duration.as_millis() as u64,
            failures: fails.iter().map(FailureView::from).collect(),
        }
    }
}

fn plain_text(fails: &[CurrentFail]) -> String {
    fails
        .iter()
        .map(|f| format!("- {}: {}", f.key, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Alerter for AlertDispatcher {
    async fn alert(&self, host: &str, run: &Run, delta: &FailureDelta) {
        if !delta.has_changes() {
            debug!("主机 {} 失败状态无变化", host);
            return;
        }

        for message in self.build_messages(host, run, delta) {
            for sender in &self.senders {
                if let Err(e) = sender.send_message(&message).await {
                    error!(
                        "发送{}通知失败 ({}): {} - {}",
                        message.message_type,
                        sender.name(),
                        host,
                        e
                    );
                }
            }
        }
    }
}
