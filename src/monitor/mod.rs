//! 监控引擎模块
//!
//! 提供目标匹配、任务调度、远程执行和失败登记功能

pub mod connection;
pub mod evaluator;
pub mod executor;
pub mod failures;
pub mod host;
pub mod output;
pub mod probe;
pub mod run;
pub mod scheduler;
pub mod ssh;
pub mod target;
pub mod task;

// 重新导出主要类型
pub use connection::{Connection, Session, SessionOutput};
pub use evaluator::{evaluate_checks, Bindings, CheckEvaluator, EvalError, SimpleEvaluator};
pub use executor::{RunExecutor, RUN_TIMEOUT};
pub use failures::{CurrentFail, FailureDelta, FailureKind, FailureRegistry};
pub use host::{build_fleet, Host};
pub use probe::{Check, Probe};
pub use run::{Run, RunError, TaskResult};
pub use scheduler::{run_fleet, HostScheduler, SchedulerStats, TICK_INTERVAL};
pub use ssh::SshConnection;
pub use target::matches;
pub use task::{Task, TaskId};
