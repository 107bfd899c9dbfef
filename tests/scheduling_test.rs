//! 主机调度循环集成测试
//!
//! 使用模拟连接和暂停的 tokio 时钟验证调度节拍、回放、加急和关闭行为

use async_trait::async_trait;
use host_vitals::error::ConnectionError;
use host_vitals::monitor::{
    Check, Connection, FailureDelta, FailureRegistry, Host, HostScheduler, Probe, Run,
    RunExecutor, Session, SessionOutput, SimpleEvaluator,
};
use host_vitals::notification::Alerter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// 模拟远程主机的状态
#[derive(Default)]
struct RemoteState {
    /// 接下来需要失败的连接次数
    fail_connects: usize,
    /// 远程执行耗时
    exec: Duration,
    /// 脚本输出的 LOAD 值
    load: u32,
    /// 每次连接的时间
    connects: Vec<Instant>,
    /// 每个会话执行的任务数
    batches: Vec<usize>,
    /// 连接关闭次数
    closes: usize,
}

#[derive(Clone, Default)]
struct Remote(Arc<Mutex<RemoteState>>);

impl Remote {
    fn new(exec_secs: u64, load: u32) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.0.lock().unwrap();
            state.exec = Duration::from_secs(exec_secs);
            state.load = load;
        }
        remote
    }

    fn set_load(&self, load: u32) {
        self.0.lock().unwrap().load = load;
    }

    fn fail_next_connects(&self, count: usize) {
        self.0.lock().unwrap().fail_connects = count;
    }

    /// 相对于 `origin` 的连接时间（秒）
    fn connect_offsets(&self, origin: Instant) -> Vec<u64> {
        self.0
            .lock()
            .unwrap()
            .connects
            .iter()
            .map(|at| at.duration_since(origin).as_secs())
            .collect()
    }

    fn batches(&self) -> Vec<usize> {
        self.0.lock().unwrap().batches.clone()
    }

    fn closes(&self) -> usize {
        self.0.lock().unwrap().closes
    }
}

struct MockConnection {
    remote: Remote,
}

struct MockSession {
    remote: Remote,
}

#[async_trait]
impl Session for MockSession {
    async fn run(&mut self, _command: &str, stdin: &str) -> Result<SessionOutput, ConnectionError> {
        let indices: Vec<usize> = stdin
            .lines()
            .filter_map(|line| line.strip_prefix("echo \"__HV_BEGIN "))
            .filter_map(|rest| rest.split_whitespace().next())
            .filter_map(|index| index.parse().ok())
            .collect();

        let (exec, load) = {
            let mut state = self.remote.0.lock().unwrap();
            state.batches.push(indices.len());
            (state.exec, state.load)
        };

        sleep(exec).await;

        let mut stdout = String::new();
        for index in indices {
            stdout.push_str(&format!("__HV_BEGIN {} 1700000000\n", index));
            stdout.push_str(&format!("LOAD: {}\n", load));
            stdout.push_str(&format!("__HV_END {} 0 1700000001\n", index));
        }

        Ok(SessionOutput {
            stdout,
            stderr: String::new(),
            exit_status: Some(0),
        })
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn target(&self) -> String {
        "monitor@10.0.0.1:22".to_string()
    }

    fn connection_time_warn(&self) -> Duration {
        Duration::from_secs(6)
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.remote.0.lock().unwrap();
        state.connects.push(Instant::now());
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(ConnectionError::ConnectFailed {
                target: "monitor@10.0.0.1:22".to_string(),
                reason: "Connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.remote.0.lock().unwrap().closes += 1;
    }

    async fn open_session(&mut self) -> Result<Box<dyn Session>, ConnectionError> {
        Ok(Box::new(MockSession {
            remote: self.remote.clone(),
        }))
    }
}

/// 记录每次调用收到的失败变化
#[derive(Default)]
struct RecordingAlerter {
    deltas: Mutex<Vec<(usize, usize)>>,
}

impl RecordingAlerter {
    fn new_alerts(&self) -> usize {
        self.deltas
            .lock()
            .unwrap()
            .iter()
            .filter(|(new, _)| *new > 0)
            .count()
    }

    fn recoveries(&self) -> usize {
        self.deltas
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, resolved)| *resolved > 0)
            .count()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn alert(&self, _host: &str, _run: &Run, delta: &FailureDelta) {
        self.deltas
            .lock()
            .unwrap()
            .push((delta.new.len(), delta.resolved.len()));
    }
}

fn probe(name: &str, delay_secs: u64, checks: Vec<Check>) -> Arc<Probe> {
    Arc::new(Probe {
        name: name.to_string(),
        targets: vec!["web".to_string()],
        script: format!("{}.sh", name),
        script_body: "echo \"LOAD: $(cut -d' ' -f1 /proc/loadavg)\"\n".to_string(),
        arguments: String::new(),
        delay: Duration::from_secs(delay_secs),
        timeout: Duration::from_secs(10),
        defaults: HashMap::new(),
        checks,
    })
}

fn host(remote: &Remote, probes: &[Arc<Probe>]) -> Host {
    let mut host = Host::new(
        "web-01",
        vec!["web".to_string(), "prod".to_string()],
        HashMap::new(),
        Box::new(MockConnection {
            remote: remote.clone(),
        }),
    );
    let now = Instant::now();
    for probe in probes {
        assert!(host.add_probe(probe, now));
    }
    host
}

fn scheduler(
    host: Host,
    registry: &FailureRegistry,
    alerter: &Arc<RecordingAlerter>,
) -> HostScheduler {
    HostScheduler::new(
        host,
        Arc::new(SimpleEvaluator::new()),
        registry.clone(),
        alerter.clone(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_next_run_is_advanced_before_execution() {
    let remote = Remote::new(5, 1);
    let mut host = host(&remote, &[probe("load", 300, vec![])]);
    let start = Instant::now();

    let due = host.select_due_tasks(start);
    assert_eq!(due, vec![0]);
    assert_eq!(host.tasks[0].next_run, start + Duration::from_secs(300));
    assert!(remote.connect_offsets(start).is_empty());

    let run = RunExecutor::new()
        .execute(&mut host, due, &CancellationToken::new())
        .await;
    assert!(run.errors.is_empty());
    assert_eq!(run.task_results.len(), 1);
    assert_eq!(host.tasks[0].next_run, start + Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn test_fixed_rate_cadence() {
    let remote = Remote::new(20, 1);
    let origin = Instant::now();
    let registry = FailureRegistry::new();
    let alerter = Arc::new(RecordingAlerter::default());
    let scheduler = scheduler(host(&remote, &[probe("load", 60, vec![])]), &registry, &alerter);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    sleep(Duration::from_secs(150)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    // 运行耗时 20 秒，周期仍然按开始时间对齐
    assert_eq!(remote.connect_offsets(origin), vec![0, 60, 120]);
    assert_eq!(stats.runs, 3);
    assert_eq!(stats.overruns, 0);
    assert_eq!(remote.closes(), 3);
    assert!(registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_overrun_is_recorded_and_loop_continues() {
    let remote = Remote::new(70, 1);
    let origin = Instant::now();
    let registry = FailureRegistry::new();
    let alerter = Arc::new(RecordingAlerter::default());
    let scheduler = scheduler(host(&remote, &[probe("load", 60, vec![])]), &registry, &alerter)
        .with_executor(RunExecutor::with_timeout(Duration::from_secs(90)));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    sleep(Duration::from_secs(150)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    // 超过节拍的周期之后立即开始下一周期
    assert_eq!(remote.connect_offsets(origin), vec![0, 70, 140]);
    assert_eq!(stats.overruns, 2);
    assert_eq!(stats.runs, 3);
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_replays_on_next_tick() {
    let remote = Remote::new(5, 1);
    remote.fail_next_connects(1);
    let origin = Instant::now();
    let registry = FailureRegistry::new();
    let alerter = Arc::new(RecordingAlerter::default());
    let scheduler = scheduler(host(&remote, &[probe("load", 300, vec![])]), &registry, &alerter);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    sleep(Duration::from_secs(200)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    // 五分钟间隔的任务在下一个一分钟周期重新执行
    assert_eq!(remote.connect_offsets(origin), vec![0, 60]);
    assert_eq!(remote.batches(), vec![1]);
    assert_eq!(stats.replays, 1);
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.ticks, 4);

    // 连接错误先告警，成功后恢复
    assert!(registry.is_empty().await);
    assert_eq!(alerter.new_alerts(), 1);
    assert_eq!(alerter.recoveries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_check_failure_expedites_until_recovery() {
    let remote = Remote::new(5, 9);
    let origin = Instant::now();
    let registry = FailureRegistry::new();
    let alerter = Arc::new(RecordingAlerter::default());
    let checks = vec![Check {
        desc: "load high".to_string(),
        expr: "LOAD < 4".to_string(),
        classes: vec![],
    }];
    let scheduler = scheduler(host(&remote, &[probe("load", 300, checks)]), &registry, &alerter);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    sleep(Duration::from_secs(130)).await;
    assert_eq!(remote.connect_offsets(origin), vec![0, 60, 120]);
    let fails = registry.snapshot().await;
    assert_eq!(fails.len(), 1);
    assert_eq!(fails[0].key, "web-01/load/check/load high");
    assert_eq!(fails[0].fail_count, 3);
    assert!(fails[0].related_task.is_some());

    remote.set_load(1);
    sleep(Duration::from_secs(270)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    // 恢复之后回到五分钟间隔
    assert_eq!(remote.connect_offsets(origin), vec![0, 60, 120, 180]);
    assert_eq!(stats.expedited, 3);
    assert!(registry.is_empty().await);
    assert_eq!(alerter.new_alerts(), 1);
    assert_eq!(alerter.recoveries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_run_exits_loop() {
    let remote = Remote::new(40, 1);
    let registry = FailureRegistry::new();
    let alerter = Arc::new(RecordingAlerter::default());
    let scheduler = scheduler(host(&remote, &[probe("load", 60, vec![])]), &registry, &alerter);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    sleep(Duration::from_secs(10)).await;
    shutdown.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(stats.runs, 1);
    assert_eq!(remote.closes(), 1);
    // 取消的运行不告警，也不写入失败登记
    assert!(alerter.deltas.lock().unwrap().is_empty());
    assert!(registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_run_fleet_joins_all_hosts_on_shutdown() {
    let first = Remote::new(5, 1);
    let second = Remote::new(5, 1);
    let hosts = vec![
        host(&first, &[probe("load", 60, vec![])]),
        {
            let mut h = host(&second, &[probe("load", 60, vec![])]);
            h.name = "web-02".to_string();
            h
        },
    ];

    let shutdown = CancellationToken::new();
    let origin = Instant::now();
    let handle = tokio::spawn(host_vitals::monitor::run_fleet(
        hosts,
        Arc::new(SimpleEvaluator::new()),
        FailureRegistry::new(),
        Arc::new(RecordingAlerter::default()),
        Duration::from_secs(30),
        shutdown.clone(),
    ));

    sleep(Duration::from_secs(100)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats.len(), 2);
    // 第二台主机的首个周期错开 15 秒
    assert_eq!(first.connect_offsets(origin), vec![0, 60]);
    assert_eq!(second.connect_offsets(origin), vec![15, 75]);
}
