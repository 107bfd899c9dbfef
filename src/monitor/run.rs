//! 运行记录
//!
//! 一次运行（Run）是一台主机在一个调度周期内对到期任务的批量执行结果，
//! 包含运行级错误和每个任务的结果（TaskResult）。

use crate::error::ConnectionError;
use crate::monitor::failures::FailureRegistry;
use crate::monitor::probe::{Check, Probe};
use crate::monitor::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// 运行级错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    /// 连接、会话或传输错误
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// 整体执行超时
    #[error("执行超时 (after {0:?})")]
    Timeout(Duration),

    /// 运行被关闭信号中断
    #[error("运行已取消")]
    Cancelled,
}

impl RunError {
    /// 错误类别，用作失败登记的键
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Connection(ConnectionError::SlowConnection { .. }) => "slow_connection",
            RunError::Connection(ConnectionError::Session(_)) => "session",
            RunError::Connection(ConnectionError::Command(_)) => "execution",
            RunError::Connection(_) => "connect",
            RunError::Timeout(_) => "timeout",
            RunError::Cancelled => "cancelled",
        }
    }
}

/// 单个任务在一次运行中的结果
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// 任务在主机任务列表中的位置
    pub task_index: usize,
    /// 任务标识
    pub task_id: TaskId,
    /// 探针
    pub probe: Arc<Probe>,
    /// 脚本输出的键值
    pub values: HashMap<String, String>,
    /// 任务错误
    pub errors: Vec<String>,
    /// 未通过的检查项
    pub failed_checks: Vec<Check>,
    /// 日志行
    pub logs: Vec<String>,
    /// 脚本退出码
    pub exit_status: Option<i32>,
    /// 开始时间
    pub start_time: DateTime<Utc>,
    /// 执行时长
    pub duration: Duration,
}

impl TaskResult {
    /// 为任务创建空结果
    pub fn new(task_index: usize, task: &Task) -> Self {
        Self {
            task_index,
            task_id: task.id,
            probe: Arc::clone(&task.probe),
            values: HashMap::new(),
            errors: Vec::new(),
            failed_checks: Vec::new(),
            logs: Vec::new(),
            exit_status: None,
            start_time: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// 任务是否执行成功（没有任务错误）
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// 任务是否完全通过（没有错误也没有失败的检查项）
    pub fn is_passing(&self) -> bool {
        self.errors.is_empty() && self.failed_checks.is_empty()
    }
}

/// 一次运行
#[derive(Debug, Clone)]
pub struct Run {
    /// 运行标识
    pub id: Uuid,
    /// 主机名称
    pub host_name: String,
    /// 参与本次运行的任务（主机任务列表中的位置）
    pub tasks: Vec<usize>,
    /// 开始时间
    pub start_time: DateTime<Utc>,
    /// 总耗时
    pub duration: Duration,
    /// 建立连接耗时
    pub dial_duration: Option<Duration>,
    /// 任务结果
    pub task_results: Vec<TaskResult>,
    /// 运行级错误
    pub errors: Vec<RunError>,
}

impl Run {
    /// 创建新的运行
    ///
    /// # 参数
    /// * `host_name` - 主机名称
    /// * `tasks` - 到期任务在主机任务列表中的位置
    pub fn new(host_name: impl Into<String>, tasks: Vec<usize>) -> Self {
        Self {
            id: Uuid::new_v4(),
            host_name: host_name.into(),
            tasks,
            start_time: Utc::now(),
            duration: Duration::ZERO,
            dial_duration: None,
            task_results: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// 记录运行级错误
    pub fn add_error(&mut self, error: impl Into<RunError>) {
        let error = error.into();
        warn!("主机 {} 运行 {} 出错: {}", self.host_name, self.id, error);
        self.errors.push(error);
    }

    /// 是否被取消
    pub fn is_cancelled(&self) -> bool {
        self.errors.iter().any(|e| matches!(e, RunError::Cancelled))
    }

    /// 是否在产生任何结果之前中止
    pub fn is_aborted(&self) -> bool {
        self.task_results.is_empty() && !self.errors.is_empty()
    }

    /// 任务错误总数
    pub fn task_error_count(&self) -> usize {
        self.task_results.iter().map(|r| r.errors.len()).sum()
    }

    /// 未通过的检查项总数
    pub fn failed_check_count(&self) -> usize {
        self.task_results.iter().map(|r| r.failed_checks.len()).sum()
    }

    /// 回放：本次运行中的每个任务回到上次到期时间
    ///
    /// 用于运行在产生结果之前中止的情况，整批任务在下个周期重新执行。
    ///
    /// # 参数
    /// * `tasks` - 主机的任务列表
    pub fn reschedule(&self, tasks: &mut [Task]) {
        for &index in &self.tasks {
            if let Some(task) = tasks.get_mut(index) {
                task.replay();
                debug!("回放任务 {} ({})", task.probe.name, task.id);
            }
        }
    }

    /// 加急：在失败登记中有关联记录的任务立即到期
    ///
    /// # 参数
    /// * `tasks` - 主机的任务列表
    /// * `registry` - 失败登记
    ///
    /// # 返回
    /// * `usize` - 被加急的任务数量
    pub async fn reschedule_failed_tasks(
        &self,
        tasks: &mut [Task],
        registry: &FailureRegistry,
    ) -> usize {
        let related = registry.related_task_ids().await;
        let now = Instant::now();
        let mut expedited = 0;

        for &index in &self.tasks {
            let Some(task) = tasks.get_mut(index) else {
                continue;
            };
            if related.contains(&task.id) {
                task.reschedule(now);
                expedited += 1;
                debug!("加急任务 {} ({})", task.probe.name, task.id);
            }
        }

        expedited
    }

    /// 一行摘要
    pub fn summary(&self) -> String {
        format!(
            "host={} run={} tasks={} results={} errors={} task_errors={} failed_checks={} duration={:?}",
            self.host_name,
            self.id,
            self.tasks.len(),
            self.task_results.len(),
            self.errors.len(),
            self.task_error_count(),
            self.failed_check_count(),
            self.duration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::failures::{CurrentFail, FailureKind};

    fn probe(name: &str, delay: u64) -> Arc<Probe> {
        Arc::new(Probe {
            name: name.to_string(),
            targets: vec!["*".to_string()],
            script: format!("{}.sh", name),
            script_body: String::new(),
            arguments: String::new(),
            delay: Duration::from_secs(delay),
            timeout: Duration::from_secs(10),
            defaults: HashMap::new(),
            checks: Vec::new(),
        })
    }

    #[test]
    fn test_error_kinds() {
        let slow: RunError = ConnectionError::SlowConnection {
            dial: Duration::from_secs(9),
            warn: Duration::from_secs(6),
        }
        .into();
        assert_eq!(slow.kind(), "slow_connection");
        assert_eq!(RunError::Timeout(Duration::from_secs(59)).kind(), "timeout");
        assert_eq!(
            RunError::from(ConnectionError::NotConnected).kind(),
            "connect"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replays_every_task_in_run() {
        let t0 = Instant::now();
        let mut tasks = vec![
            Task::new(probe("a", 300), t0),
            Task::new(probe("b", 60), t0),
            Task::new(probe("c", 60), t0),
        ];
        for task in tasks.iter_mut() {
            let delay = task.probe.delay;
            task.reschedule(t0 + delay);
        }

        let run = Run::new("h", vec![0, 1]);
        run.reschedule(&mut tasks);

        assert_eq!(tasks[0].next_run, t0);
        assert_eq!(tasks[1].next_run, t0);
        assert_eq!(tasks[2].next_run, t0 + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_failed_tasks_only_touches_related() {
        let t0 = Instant::now();
        let mut tasks = vec![Task::new(probe("a", 300), t0), Task::new(probe("b", 300), t0)];
        for task in tasks.iter_mut() {
            task.reschedule(t0 + Duration::from_secs(300));
        }

        let registry = FailureRegistry::new();
        registry
            .insert(CurrentFail::new(
                "h/b/check/x".to_string(),
                "h",
                Some("b".to_string()),
                FailureKind::CheckFailure,
                "x failed".to_string(),
            )
            .with_related_task(tasks[1].id))
            .await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let run = Run::new("h", vec![0, 1]);
        let expedited = run.reschedule_failed_tasks(&mut tasks, &registry).await;

        assert_eq!(expedited, 1);
        assert_eq!(tasks[0].next_run, t0 + Duration::from_secs(300));
        assert_eq!(tasks[1].next_run, t0 + Duration::from_secs(30));
    }

    #[test]
    fn test_aborted_run() {
        let mut run = Run::new("h", vec![0]);
        assert!(!run.is_aborted());
        run.add_error(RunError::Timeout(Duration::from_secs(59)));
        assert!(run.is_aborted());
        assert!(!run.is_cancelled());
        run.add_error(RunError::Cancelled);
        assert!(run.is_cancelled());
    }
}
