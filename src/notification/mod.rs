//! 通知模块
//!
//! 提供告警分发、webhook通知和消息模板功能

pub mod alerter;
pub mod sender;
pub mod template;
pub mod webhook;

// 重新导出主要类型
pub use alerter::{AlertDispatcher, Alerter};
pub use sender::{LogSender, MessageType, NotificationMessage, NotificationSender};
pub use template::{MessageTemplates, TemplateContext};
pub use webhook::WebhookSender;
