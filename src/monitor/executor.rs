//! 运行执行器
//!
//! 在一个远程会话中执行一台主机本周期的全部到期任务，整体受 59 秒超时约束，
//! 保证卡住的运行不会叠加到下一个一分钟周期上。

use crate::error::ConnectionError;
use crate::monitor::connection::SessionOutput;
use crate::monitor::host::Host;
use crate::monitor::output::{
    bootstrap_script, parse_output, ScriptCommand, BOOTSTRAP, TIMEOUT_EXIT_STATUS,
};
use crate::monitor::run::{Run, RunError, TaskResult};
use crate::monitor::task::Task;
use chrono::DateTime;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

/// 单次运行的整体超时
pub const RUN_TIMEOUT: Duration = Duration::from_secs(59);

/// 运行执行器
#[derive(Debug, Clone, Copy)]
pub struct RunExecutor {
    timeout: Duration,
}

impl Default for RunExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RunExecutor {
    /// 创建使用默认超时的执行器
    pub fn new() -> Self {
        Self {
            timeout: RUN_TIMEOUT,
        }
    }

    /// 创建使用指定超时的执行器
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 整体超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行一批到期任务
    ///
    /// 连接建立后无论从哪条路径退出都会关闭连接，`Run.duration` 总会被设置。
    ///
    /// # 参数
    /// * `host` - 主机
    /// * `tasks` - 到期任务在主机任务列表中的位置
    /// * `shutdown` - 关闭信号
    ///
    /// # 返回
    /// * `Run` - 运行记录
    pub async fn execute(
        &self,
        host: &mut Host,
        tasks: Vec<usize>,
        shutdown: &CancellationToken,
    ) -> Run {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut run = Run::new(host.name.clone(), tasks);

        debug!("主机 {} 开始运行 {} ({} 个任务)", host.name, run.id, run.tasks.len());

        match self.connect(host, deadline, shutdown).await {
            Ok(dial) => {
                run.dial_duration = Some(dial);
                self.run_connected(host, &mut run, dial, deadline, shutdown)
                    .await;
                host.connection.close().await;
            }
            Err(e) => run.add_error(e),
        }

        run.duration = started.elapsed();
        run
    }

    /// 建立连接，受运行截止时间和关闭信号约束
    async fn connect(
        &self,
        host: &mut Host,
        deadline: Instant,
        shutdown: &CancellationToken,
    ) -> Result<Duration, RunError> {
        let dial_start = Instant::now();

        let result = tokio::select! {
            _ = shutdown.cancelled() => return Err(RunError::Cancelled),
            result = timeout_at(deadline, host.connection.connect()) => result,
        };

        match result {
            Err(_) => Err(RunError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(())) => Ok(dial_start.elapsed()),
        }
    }

    /// 在已建立的连接上执行任务
    async fn run_connected(
        &self,
        host: &mut Host,
        run: &mut Run,
        dial: Duration,
        deadline: Instant,
        shutdown: &CancellationToken,
    ) {
        let warn = host.connection.connection_time_warn();
        if dial > warn {
            run.add_error(ConnectionError::SlowConnection { dial, warn });
            return;
        }

        let mut session = match host.connection.open_session().await {
            Ok(session) => session,
            Err(e) => {
                run.add_error(e);
                return;
            }
        };

        let delimiter = format!("__HV_EOF_{}", Uuid::new_v4().simple());
        let commands: Vec<ScriptCommand<'_>> = run
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(position, &index)| {
                host.tasks.get(index).map(|task| ScriptCommand {
                    index: position,
                    script: &task.probe.script_body,
                    arguments: &task.probe.arguments,
                    timeout: task.probe.timeout,
                })
            })
            .collect();
        let stdin = bootstrap_script(&commands, &delimiter);
        trace!("主机 {} 引导脚本:\n{}", host.name, stdin);

        let cancel = shutdown.child_token();
        let helper_cancel = cancel.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = helper_cancel.cancelled() => None,
                result = session.run(BOOTSTRAP, &stdin) => Some(result),
            };
            // 会话在这里被丢弃，本地传输进程随之结束
            drop(session);
            if let Some(result) = result {
                let _ = tx.send(result);
            }
        });

        tokio::select! {
            received = rx => match received {
                Ok(Ok(output)) => {
                    let results = collect_results(&host.tasks, run, output);
                    run.task_results = results;
                }
                Ok(Err(e)) => run.add_error(e),
                Err(_) => run.add_error(ConnectionError::Command("执行任务意外结束".to_string())),
            },
            _ = sleep_until(deadline) => {
                cancel.cancel();
                run.add_error(RunError::Timeout(self.timeout));
            }
            _ = shutdown.cancelled() => {
                cancel.cancel();
                run.add_error(RunError::Cancelled);
            }
        }
    }
}

/// 把远程输出拆分为每个任务的结果
fn collect_results(tasks: &[Task], run: &Run, output: SessionOutput) -> Vec<TaskResult> {
    if !output.stderr.trim().is_empty() {
        debug!("主机 {} 远程标准错误: {}", run.host_name, output.stderr.trim());
    }

    let parsed = parse_output(&output.stdout);
    let mut results = Vec::with_capacity(run.tasks.len());

    for (position, &index) in run.tasks.iter().enumerate() {
        let Some(task) = tasks.get(index) else {
            continue;
        };
        let mut result = TaskResult::new(index, task);
        result.start_time = run.start_time;

        let Some(parsed) = parsed.get(&position) else {
            result.errors.push("脚本没有输出".to_string());
            results.push(result);
            continue;
        };

        result.values = parsed.values.clone();
        result.errors = parsed.errors.clone();
        result.logs = parsed.logs.clone();
        result.exit_status = parsed.exit_status;
        result.duration = parsed.duration();
        if let Some(start) = parsed.started_at.and_then(|s| DateTime::from_timestamp(s, 0)) {
            result.start_time = start;
        }

        match parsed.exit_status {
            Some(0) => {}
            Some(TIMEOUT_EXIT_STATUS) => result.errors.push(format!(
                "脚本执行超时 (timeout = {:?})",
                task.probe.timeout
            )),
            Some(status) => result.errors.push(format!("脚本退出码 {}", status)),
            None => result.errors.push("脚本输出不完整".to_string()),
        }

        results.push(result);
    }

    results
}
