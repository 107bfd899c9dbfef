//! 远程连接接口
//!
//! 调度引擎只依赖这里定义的 trait：建立连接、关闭连接、打开会话、
//! 在会话中执行一条命令。具体的 SSH 实现见 `monitor::ssh`。

use crate::error::ConnectionError;
use async_trait::async_trait;
use std::time::Duration;

/// 远程命令的输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutput {
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
    /// 退出码
    pub exit_status: Option<i32>,
}

/// 一次远程会话
///
/// 会话被丢弃时必须停止仍在执行的远程命令，执行器依赖这一点实现超时取消。
#[async_trait]
pub trait Session: Send {
    /// 执行命令，`stdin` 作为命令的标准输入
    ///
    /// # 参数
    /// * `command` - 远程命令
    /// * `stdin` - 标准输入内容
    ///
    /// # 返回
    /// * `Result<SessionOutput, ConnectionError>` - 命令输出
    async fn run(&mut self, command: &str, stdin: &str) -> Result<SessionOutput, ConnectionError>;
}

/// 远程连接
#[async_trait]
pub trait Connection: Send + Sync {
    /// 连接目标描述（user@host:port）
    fn target(&self) -> String;

    /// 连接耗时告警阈值
    fn connection_time_warn(&self) -> Duration;

    /// 建立连接
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// 关闭连接，未连接时无操作
    async fn close(&mut self);

    /// 在已建立的连接上打开新会话
    async fn open_session(&mut self) -> Result<Box<dyn Session>, ConnectionError>;
}
