//! 失败登记
//!
//! 进程级的当前失败列表，所有主机的调度循环共享同一个登记。
//! 每次运行结束后由调度器调用 [`FailureRegistry::record_run`] 更新，
//! 返回的 [`FailureDelta`] 交给告警器，登记中的任务关联用于加急重检。

use crate::monitor::run::{Run, RunError};
use crate::monitor::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 运行级错误（连接、超时等）
    RunError,
    /// 任务错误（脚本报错、非零退出码）
    TaskError,
    /// 检查项未通过
    CheckFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RunError => write!(f, "运行错误"),
            FailureKind::TaskError => write!(f, "任务错误"),
            FailureKind::CheckFailure => write!(f, "检查失败"),
        }
    }
}

/// 一条当前失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentFail {
    /// 记录标识
    pub id: Uuid,
    /// 稳定键
    pub key: String,
    /// 主机名称
    pub host_name: String,
    /// 探针名称，运行级错误为 None
    pub probe_name: Option<String>,
    /// 失败类别
    pub kind: FailureKind,
    /// 最近一次的失败信息
    pub message: String,
    /// 首次出现时间
    pub first_seen: DateTime<Utc>,
    /// 最近出现时间
    pub last_seen: DateTime<Utc>,
    /// 连续出现次数
    pub fail_count: u32,
    /// 关联任务（检查项失败）
    pub related_task: Option<TaskId>,
    /// 关联任务（任务错误）
    pub related_ttask: Option<TaskId>,
}

impl CurrentFail {
    /// 创建新的失败记录
    pub fn new(
        key: String,
        host_name: impl Into<String>,
        probe_name: Option<String>,
        kind: FailureKind,
        message: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key,
            host_name: host_name.into(),
            probe_name,
            kind,
            message,
            first_seen: now,
            last_seen: now,
            fail_count: 1,
            related_task: None,
            related_ttask: None,
        }
    }

    /// 设置检查项失败关联的任务
    pub fn with_related_task(mut self, task_id: TaskId) -> Self {
        self.related_task = Some(task_id);
        self
    }

    /// 设置任务错误关联的任务
    pub fn with_related_ttask(mut self, task_id: TaskId) -> Self {
        self.related_ttask = Some(task_id);
        self
    }

    /// 是否关联到给定任务
    pub fn relates_to(&self, task_id: TaskId) -> bool {
        self.related_task == Some(task_id) || self.related_ttask == Some(task_id)
    }
}

/// 一次运行带来的登记变化
#[derive(Debug, Clone, Default)]
pub struct FailureDelta {
    /// 新出现的失败
    pub new: Vec<CurrentFail>,
    /// 持续中的失败
    pub ongoing: Vec<CurrentFail>,
    /// 已恢复的失败
    pub resolved: Vec<CurrentFail>,
}

impl FailureDelta {
    /// 是否需要通知（有新失败或恢复）
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.resolved.is_empty()
    }
}

/// 运行级错误的键
pub fn run_error_key(host: &str, error: &RunError) -> String {
    format!("{}/run/{}", host, error.kind())
}

/// 任务错误的键
pub fn task_error_key(host: &str, probe: &str) -> String {
    format!("{}/{}/task", host, probe)
}

/// 检查项失败的键
pub fn check_failure_key(host: &str, probe: &str, desc: &str) -> String {
    format!("{}/{}/check/{}", host, probe, desc)
}

/// 本次运行可以判定恢复的记录范围
struct ResolutionScope<'a> {
    host: &'a str,
    completed: bool,
    task_probes: HashSet<&'a str>,
    check_probes: HashSet<&'a str>,
}

impl ResolutionScope<'_> {
    fn contains(&self, entry: &CurrentFail) -> bool {
        if entry.host_name != self.host {
            return false;
        }
        let probe = entry.probe_name.as_deref().unwrap_or_default();
        match entry.kind {
            FailureKind::RunError => self.completed,
            FailureKind::TaskError => self.task_probes.contains(probe),
            FailureKind::CheckFailure => self.check_probes.contains(probe),
        }
    }
}

/// 共享的失败登记
#[derive(Debug, Clone, Default)]
pub struct FailureRegistry {
    entries: Arc<RwLock<HashMap<String, CurrentFail>>>,
}

impl FailureRegistry {
    /// 创建空登记
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换一条记录
    pub async fn insert(&self, entry: CurrentFail) {
        let mut entries = self.entries.write().await;
        entries.insert(entry.key.clone(), entry);
    }

    /// 移除一条记录
    pub async fn remove(&self, key: &str) -> Option<CurrentFail> {
        let mut entries = self.entries.write().await;
        entries.remove(key)
    }

    /// 记录数量
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 按键排序的记录快照
    pub async fn snapshot(&self) -> Vec<CurrentFail> {
        let entries = self.entries.read().await;
        let mut list: Vec<CurrentFail> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list
    }

    /// 所有记录关联的任务标识
    pub async fn related_task_ids(&self) -> HashSet<TaskId> {
        let entries = self.entries.read().await;
        entries
            .values()
            .flat_map(|e| [e.related_task, e.related_ttask])
            .flatten()
            .collect()
    }

    /// 给定任务是否有关联的失败记录
    pub async fn has_failure_for(&self, task_id: TaskId) -> bool {
        let entries = self.entries.read().await;
        entries.values().any(|e| e.relates_to(task_id))
    }

    /// 根据一次完成的运行更新登记
    ///
    /// 运行级记录在运行完成且不再出现同类错误时恢复，中止的运行不恢复任何
    /// 运行级记录；任务和检查项记录只在
    /// 对应任务本次产生了结果时才参与判定，检查项记录还要求任务本身没有错误。
    ///
    /// # 参数
    /// * `run` - 已完成并经过检查项求值的运行
    ///
    /// # 返回
    /// * `FailureDelta` - 新增、持续和恢复的记录
    pub async fn record_run(&self, run: &Run) -> FailureDelta {
        let host = run.host_name.as_str();
        let mut observed: Vec<CurrentFail> = Vec::new();
        let mut scope = ResolutionScope {
            host,
            completed: !run.is_aborted(),
            task_probes: HashSet::new(),
            check_probes: HashSet::new(),
        };

        for error in &run.errors {
            if matches!(error, RunError::Cancelled) {
                continue;
            }
            observed.push(CurrentFail::new(
                run_error_key(host, error),
                host,
                None,
                FailureKind::RunError,
                error.to_string(),
            ));
        }

        for result in &run.task_results {
            let probe = result.probe.name.as_str();
            scope.task_probes.insert(probe);

            if !result.is_success() {
                observed.push(
                    CurrentFail::new(
                        task_error_key(host, probe),
                        host,
                        Some(probe.to_string()),
                        FailureKind::TaskError,
                        result.errors.join("; "),
                    )
                    .with_related_ttask(result.task_id),
                );
                continue;
            }

            scope.check_probes.insert(probe);
            for check in &result.failed_checks {
                observed.push(
                    CurrentFail::new(
                        check_failure_key(host, probe, &check.desc),
                        host,
                        Some(probe.to_string()),
                        FailureKind::CheckFailure,
                        format!("{} ({})", check.desc, check.expr),
                    )
                    .with_related_task(result.task_id),
                );
            }
        }

        let mut delta = FailureDelta::default();
        let mut entries = self.entries.write().await;
        let observed_keys: HashSet<String> = observed.iter().map(|e| e.key.clone()).collect();

        for fail in observed {
            match entries.get_mut(&fail.key) {
                Some(existing) => {
                    existing.fail_count += 1;
                    existing.last_seen = fail.last_seen;
                    existing.message = fail.message;
                    existing.related_task = fail.related_task.or(existing.related_task);
                    existing.related_ttask = fail.related_ttask.or(existing.related_ttask);
                    debug!("失败持续: {} (第 {} 次)", existing.key, existing.fail_count);
                    delta.ongoing.push(existing.clone());
                }
                None => {
                    info!("新失败: {} - {}", fail.key, fail.message);
                    delta.new.push(fail.clone());
                    entries.insert(fail.key.clone(), fail);
                }
            }
        }

        let resolved_keys: Vec<String> = entries
            .values()
            .filter(|e| scope.contains(e) && !observed_keys.contains(&e.key))
            .map(|e| e.key.clone())
            .collect();

        for key in resolved_keys {
            if let Some(entry) = entries.remove(&key) {
                info!("失败已恢复: {}", entry.key);
                delta.resolved.push(entry);
            }
        }

        delta
    }
}
