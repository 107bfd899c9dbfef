//! 消息模板模块
//!
//! 使用Handlebars渲染告警和恢复消息

use crate::monitor::failures::CurrentFail;
use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;

/// 模板中的一条失败记录
#[derive(Debug, Clone, Serialize)]
pub struct FailureView {
    /// 稳定键
    pub key: String,
    /// 失败类别
    pub kind: String,
    /// 探针名称
    pub probe: Option<String>,
    /// 失败信息
    pub message: String,
    /// 连续出现次数
    pub fail_count: u32,
    /// 首次出现时间
    pub first_seen: String,
}

impl From<&CurrentFail> for FailureView {
    fn from(fail: &CurrentFail) -> Self {
        Self {
            key: fail.key.clone(),
            kind: fail.kind.to_string(),
            probe: fail.probe_name.clone(),
            message: fail.message.clone(),
            fail_count: fail.fail_count,
            first_seen: fail.first_seen.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// 模板上下文数据
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    /// 主机名称
    pub host_name: String,
    /// 运行标识
    pub run_id: String,
    /// 时间戳
    pub timestamp: String,
    /// 运行耗时（毫秒）
    pub duration_ms: u64,
    /// 本条消息涉及的失败记录
    pub failures: Vec<FailureView>,
}

const ALERT_TEMPLATE: &str = "alert";
const RECOVERY_TEMPLATE: &str = "recovery";

/// 告警和恢复消息模板
pub struct MessageTemplates {
    registry: Handlebars<'static>,
}

impl MessageTemplates {
    /// 注册模板，未配置时使用默认模板
    ///
    /// # 参数
    /// * `alert` - 自定义告警模板
    /// * `recovery` - 自定义恢复模板
    ///
    /// # 返回
    /// * `Result<Self>` - 模板集合，模板语法错误时返回错误
    pub fn new(alert: Option<&str>, recovery: Option<&str>) -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);

        registry
            .register_template_string(ALERT_TEMPLATE, alert.unwrap_or(DEFAULT_ALERT_TEMPLATE))
            .context("告警模板语法错误")?;
        registry
            .register_template_string(
                RECOVERY_TEMPLATE,
                recovery.unwrap_or(DEFAULT_RECOVERY_TEMPLATE),
            )
            .context("恢复模板语法错误")?;

        Ok(Self { registry })
    }

    /// 渲染告警消息
    pub fn render_alert(&self, context: &TemplateContext) -> Result<String> {
        self.registry
            .render(ALERT_TEMPLATE, context)
            .context("渲染告警模板失败")
    }

    /// 渲染恢复消息
    pub fn render_recovery(&self, context: &TemplateContext) -> Result<String> {
        self.registry
            .render(RECOVERY_TEMPLATE, context)
            .context("渲染恢复模板失败")
    }
}

/// 默认的告警消息模板
pub const DEFAULT_ALERT_TEMPLATE: &str = r#"🚨 **主机告警**
- **主机名称**: {{host_name}}
- **检测时间**: {{timestamp}}
{{#each failures}}
- [{{kind}}]{{#if probe}} {{probe}}:{{/if}} {{message}} (第 {{fail_count}} 次)
{{/each}}"#;

/// 默认的恢复消息模板
pub const DEFAULT_RECOVERY_TEMPLATE: &str = r#"✅ **主机恢复**
- **主机名称**: {{host_name}}
- **恢复时间**: {{timestamp}}
{{#each failures}}
- [{{kind}}]{{#if probe}} {{probe}}:{{/if}} {{message}} (自 {{first_seen}})
{{/each}}"#;
