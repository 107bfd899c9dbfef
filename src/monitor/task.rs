//! 调度任务
//!
//! 任务把一台主机和一个匹配的探针绑定在一起，并记录上次与下次的到期时间

use crate::monitor::probe::Probe;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// 进程内唯一的任务标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// 生成新的任务标识
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 调度任务
#[derive(Debug, Clone)]
pub struct Task {
    /// 任务标识
    pub id: TaskId,
    /// 共享的探针定义
    pub probe: Arc<Probe>,
    /// 下次到期时间
    pub next_run: Instant,
    /// 上次到期时间
    pub prev_run: Instant,
}

impl Task {
    /// 创建新任务，立即到期
    pub fn new(probe: Arc<Probe>, now: Instant) -> Self {
        Self {
            id: TaskId::new(),
            probe,
            next_run: now,
            prev_run: now,
        }
    }

    /// 判断任务在给定时间是否到期
    pub fn is_due(&self, at: Instant) -> bool {
        at >= self.next_run
    }

    /// 重新设置下次到期时间，保留当前到期时间作为上次到期时间
    pub fn reschedule(&mut self, at: Instant) {
        self.prev_run = self.next_run;
        self.next_run = at;
    }

    /// 回放：下次到期时间回退到上次到期时间
    pub fn replay(&mut self) {
        self.next_run = self.prev_run;
    }
}
