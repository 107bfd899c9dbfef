//! 被监控主机
//!
//! 主机拥有自己的连接和任务列表，由所属的调度循环独占，不与其他主机共享。

use crate::config::types::toml_value_to_string;
use crate::config::{ConfigTree, GlobalConfig, HostConfig};
use crate::error::ConnectionError;
use crate::monitor::connection::Connection;
use crate::monitor::probe::Probe;
use crate::monitor::target;
use crate::monitor::task::Task;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

/// 被监控主机
pub struct Host {
    /// 名称
    pub name: String,
    /// 标签
    pub classes: Vec<String>,
    /// 默认绑定值
    pub defaults: HashMap<String, String>,
    /// 远程连接
    pub connection: Box<dyn Connection>,
    /// 任务列表
    pub tasks: Vec<Task>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("classes", &self.classes)
            .field("target", &self.connection.target())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Host {
    /// 创建主机
    ///
    /// # 参数
    /// * `name` - 主机名称
    /// * `classes` - 标签
    /// * `defaults` - 默认绑定值
    /// * `connection` - 远程连接
    pub fn new(
        name: impl Into<String>,
        classes: Vec<String>,
        defaults: HashMap<String, String>,
        connection: Box<dyn Connection>,
    ) -> Self {
        Self {
            name: name.into(),
            classes,
            defaults,
            connection,
            tasks: Vec::new(),
        }
    }

    /// 探针匹配本主机时添加任务
    ///
    /// # 返回
    /// * `bool` - 是否添加了任务
    pub fn add_probe(&mut self, probe: &Arc<Probe>, now: Instant) -> bool {
        if !target::matches(&self.classes, &probe.targets) {
            return false;
        }
        self.tasks.push(Task::new(Arc::clone(probe), now));
        true
    }

    /// 选出到期任务，并在执行前把它们的下次到期时间推进到 `start + delay`
    ///
    /// # 参数
    /// * `start` - 本周期开始时间
    ///
    /// # 返回
    /// * `Vec<usize>` - 到期任务在任务列表中的位置
    pub fn select_due_tasks(&mut self, start: Instant) -> Vec<usize> {
        let mut due = Vec::new();
        for (index, task) in self.tasks.iter_mut().enumerate() {
            if task.is_due(start) {
                let delay = task.probe.delay;
                task.reschedule(start + delay);
                due.push(index);
            }
        }
        due
    }

    /// 快速检查连接
    ///
    /// 在两倍连接告警阈值内建立连接，成功后立即关闭；不执行任何远程命令。
    ///
    /// # 返回
    /// * `Result<Duration, ConnectionError>` - 连接耗时
    pub async fn test_connection(&mut self) -> Result<Duration, ConnectionError> {
        let warn = self.connection.connection_time_warn();
        let limit = warn * 2;
        let started = Instant::now();

        match timeout(limit, self.connection.connect()).await {
            Err(_) => Err(ConnectionError::Timeout(limit)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                let dial = started.elapsed();
                self.connection.close().await;
                debug!("主机 {} 连接耗时 {:?}", self.name, dial);
                if dial > warn {
                    Err(ConnectionError::SlowConnection { dial, warn })
                } else {
                    Ok(dial)
                }
            }
        }
    }
}

/// 根据配置树构建主机列表和任务
///
/// 每个探针只创建一个 `Arc<Probe>`，由所有匹配主机的任务共享。
///
/// # 参数
/// * `tree` - 已加载的配置树
/// * `connector` - 为主机创建连接
/// * `now` - 任务的初始到期时间
///
/// # 返回
/// * `Vec<Host>` - 主机列表
pub fn build_fleet<F>(tree: &ConfigTree, connector: F, now: Instant) -> Vec<Host>
where
    F: Fn(&HostConfig, &GlobalConfig) -> Box<dyn Connection>,
{
    let probes: Vec<Arc<Probe>> = tree
        .probes
        .iter()
        .cloned()
        .map(|loaded| Arc::new(Probe::from(loaded)))
        .collect();

    tree.hosts
        .iter()
        .map(|config| {
            let defaults = config
                .defaults
                .iter()
                .map(|(k, v)| (k.clone(), toml_value_to_string(v)))
                .collect();
            let mut host = Host::new(
                config.name.clone(),
                config.classes.clone(),
                defaults,
                connector(config, &tree.global),
            );
            for probe in &probes {
                host.add_probe(probe, now);
            }
            info!("主机 {} 匹配 {} 个探针", host.name, host.tasks.len());
            host
        })
        .collect()
}
