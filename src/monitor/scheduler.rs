//! 主机调度器
//!
//! 每台主机一个独立的调度循环，固定一分钟节拍：
//! 选出到期任务并立即推进下次到期时间，执行运行，对结果求值检查项，
//! 更新失败登记，回放或加急任务，最后交给告警器。

use crate::logging::LoggingSystem;
use crate::monitor::evaluator::{evaluate_checks, CheckEvaluator};
use crate::monitor::executor::RunExecutor;
use crate::monitor::failures::FailureRegistry;
use crate::monitor::host::Host;
use crate::monitor::run::Run;
use crate::notification::Alerter;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 调度节拍
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// 调度循环统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    /// 调度周期数
    pub ticks: u64,
    /// 执行的运行数
    pub runs: u64,
    /// 超过节拍的周期数
    pub overruns: u64,
    /// 整批回放次数
    pub replays: u64,
    /// 被加急的任务数
    pub expedited: u64,
}

/// 一个周期结束后的节拍决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// 睡眠剩余时间
    Sleep(Duration),
    /// 本周期超过节拍，立即进入下一周期
    Overrun(Duration),
}

/// 根据本周期耗时计算节拍
///
/// # 参数
/// * `elapsed` - 本周期耗时
/// * `cadence` - 节拍
pub fn pace(elapsed: Duration, cadence: Duration) -> Pace {
    if elapsed < cadence {
        Pace::Sleep(cadence - elapsed)
    } else {
        Pace::Overrun(elapsed)
    }
}

/// 单台主机的调度器
pub struct HostScheduler {
    host: Host,
    executor: RunExecutor,
    evaluator: Arc<dyn CheckEvaluator>,
    registry: FailureRegistry,
    alerter: Arc<dyn Alerter>,
    cadence: Duration,
    start_delay: Duration,
    stats: SchedulerStats,
}

impl HostScheduler {
    /// 创建调度器
    ///
    /// # 参数
    /// * `host` - 主机，由调度器独占
    /// * `evaluator` - 检查项求值器
    /// * `registry` - 共享的失败登记
    /// * `alerter` - 告警器
    pub fn new(
        host: Host,
        evaluator: Arc<dyn CheckEvaluator>,
        registry: FailureRegistry,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            host,
            executor: RunExecutor::new(),
            evaluator,
            registry,
            alerter,
            cadence: TICK_INTERVAL,
            start_delay: Duration::ZERO,
            stats: SchedulerStats::default(),
        }
    }

    /// 设置执行器
    pub fn with_executor(mut self, executor: RunExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// 设置首个周期前的等待时间
    pub fn with_start_delay(mut self, start_delay: Duration) -> Self {
        self.start_delay = start_delay;
        self
    }

    /// 主机
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// 统计
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// 执行一个调度周期
    ///
    /// # 参数
    /// * `start` - 周期开始时间
    /// * `shutdown` - 关闭信号
    ///
    /// # 返回
    /// * `Option<Run>` - 有到期任务时返回本周期的运行
    pub async fn tick(&mut self, start: Instant, shutdown: &CancellationToken) -> Option<Run> {
        self.stats.ticks += 1;

        let due = self.host.select_due_tasks(start);
        if due.is_empty() {
            debug!("主机 {} 本周期没有到期任务", self.host.name);
            return None;
        }

        let mut run = self.executor.execute(&mut self.host, due, shutdown).await;
        self.stats.runs += 1;

        if run.is_cancelled() {
            info!("主机 {} 的运行 {} 已取消", self.host.name, run.id);
            return Some(run);
        }

        for result in run.task_results.iter_mut() {
            evaluate_checks(
                self.evaluator.as_ref(),
                result,
                &self.host.defaults,
                &self.host.classes,
            );
        }

        let delta = self.registry.record_run(&run).await;

        if run.is_aborted() {
            run.reschedule(&mut self.host.tasks);
            self.stats.replays += 1;
        } else {
            let expedited = run
                .reschedule_failed_tasks(&mut self.host.tasks, &self.registry)
                .await;
            self.stats.expedited += expedited as u64;
        }

        LoggingSystem::run_log(&run);
        self.alerter.alert(&self.host.name, &run, &delta).await;

        Some(run)
    }

    /// 运行调度循环直到收到关闭信号
    ///
    /// # 参数
    /// * `shutdown` - 关闭信号
    ///
    /// # 返回
    /// * `SchedulerStats` - 循环退出时的统计
    pub async fn run(mut self, shutdown: CancellationToken) -> SchedulerStats {
        info!(
            "启动主机调度循环: {} ({} 个任务, 延迟 {:?})",
            self.host.name,
            self.host.tasks.len(),
            self.start_delay
        );

        if !self.start_delay.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => return self.stats,
                _ = sleep(self.start_delay) => {}
            }
        }

        while !shutdown.is_cancelled() {
            let start = Instant::now();

            if let Some(run) = self.tick(start, &shutdown).await {
                if run.is_cancelled() {
                    break;
                }
            }

            match pace(start.elapsed(), self.cadence) {
                Pace::Sleep(_) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep_until(start + self.cadence) => {}
                    }
                }
                Pace::Overrun(elapsed) => {
                    self.stats.overruns += 1;
                    error!(
                        "主机 {} 调度周期超时: 耗时 {:?} (节拍 {:?})",
                        self.host.name, elapsed, self.cadence
                    );
                }
            }
        }

        info!("主机调度循环已停止: {}", self.host.name);
        self.stats
    }
}

/// 第 `index` 台主机（共 `total` 台）首个周期前的等待时间
pub fn start_delay(index: usize, total: usize, spread: Duration) -> Duration {
    if total == 0 || spread.is_zero() {
        return Duration::ZERO;
    }
    spread.mul_f64(index as f64 / total as f64)
}

/// 为每台主机启动调度循环并等待全部退出
///
/// # 参数
/// * `hosts` - 主机列表
/// * `evaluator` - 检查项求值器
/// * `registry` - 共享的失败登记
/// * `alerter` - 告警器
/// * `spread` - 首个周期的错开范围
/// * `shutdown` - 关闭信号
///
/// # 返回
/// * `Vec<(String, SchedulerStats)>` - 每台主机的统计
pub async fn run_fleet(
    hosts: Vec<Host>,
    evaluator: Arc<dyn CheckEvaluator>,
    registry: FailureRegistry,
    alerter: Arc<dyn Alerter>,
    spread: Duration,
    shutdown: CancellationToken,
) -> Vec<(String, SchedulerStats)> {
    let total = hosts.len();
    info!("启动 {} 个主机调度循环", total);

    let handles: Vec<_> = hosts
        .into_iter()
        .enumerate()
        .map(|(index, host)| {
            let name = host.name.clone();
            let scheduler = HostScheduler::new(
                host,
                Arc::clone(&evaluator),
                registry.clone(),
                Arc::clone(&alerter),
            )
            .with_start_delay(start_delay(index, total, spread));
            let token = shutdown.clone();
            (name, tokio::spawn(scheduler.run(token)))
        })
        .collect();

    let (names, tasks): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
    let results = join_all(tasks).await;

    names
        .into_iter()
        .zip(results)
        .filter_map(|(name, result)| match result {
            Ok(stats) => Some((name, stats)),
            Err(e) => {
                error!("主机调度循环异常退出 {}: {}", name, e);
                None
            }
        })
        .collect()
}
