//! 日志系统模块
//!
//! 提供结构化日志配置和运行摘要日志

use crate::monitor::run::Run;
use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug, Default)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化失败时的错误信息
    init_error: Option<String>,
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

fn global_state() -> MutexGuard<'static, GlobalLoggingState> {
    GLOBAL_LOGGING_STATE
        .get_or_init(|| Mutex::new(GlobalLoggingState::default()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

/// 解析日志级别字符串，无法识别时返回 None
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// 日志系统管理器
#[derive(Debug)]
pub struct LoggingSystem {
    /// 配置
    config: LogConfig,
}

impl LoggingSystem {
    /// 初始化日志系统
    ///
    /// 重复调用不会重复安装subscriber，返回新的 `LoggingSystem` 实例；
    /// 首次初始化失败后，之后的调用都返回该错误。
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `Result<LoggingSystem, anyhow::Error>` - 初始化结果
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        {
            let state = global_state();
            if state.initialized {
                if let Some(ref e) = state.init_error {
                    return Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e));
                }
                return Ok(Self { config });
            }
        }

        let init_result = Self::perform_initialization(&config);

        {
            let mut state = global_state();
            state.initialized = true;
            state.init_error = init_result.as_ref().err().map(|e| e.to_string());
        }

        init_result?;
        Ok(Self { config })
    }

    /// 当前实例的配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        // log crate 到 tracing 的桥接
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)?;
        Ok(())
    }

    /// 初始化 LogTracer
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        let result = LOG_TRACER_INIT.get_or_init(|| LogTracer::init().map_err(|e| e.to_string()));

        result
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 构建过滤器：全局级别 + 模块级别 + RUST_LOG
    fn build_filter(config: &LogConfig) -> EnvFilter {
        let mut filter = EnvFilter::from_default_env();

        let global = config.level.as_str().to_ascii_lowercase();
        if let Ok(directive) = global.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }

        for (module, level) in &config.module_levels {
            let spec = format!("{}={}", module, level.as_str().to_ascii_lowercase());
            match spec.parse::<Directive>() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("忽略无效的模块日志级别 {}: {}", module, e),
            }
        }

        filter
    }

    /// 初始化 tracing subscriber
    ///
    /// 控制台和文件输出可以同时启用，文件输出不使用ANSI颜色。
    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let console_layer = config.console.then(|| {
            if config.json_format {
                fmt::layer()
                    .json()
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_current_span(false)
                    .boxed()
            } else {
                fmt::layer()
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_target(true)
                    .boxed()
            }
        });

        let file_layer = match &config.file_path {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| anyhow::anyhow!("打开日志文件失败 {}: {}", path.display(), e))?;
                Some(
                    fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .with_timer(fmt::time::ChronoUtc::rfc_3339())
                        .boxed(),
                )
            }
            None => None,
        };

        let result = registry()
            .with(Self::build_filter(config))
            .with(console_layer)
            .with(file_layer)
            .try_init();

        match result {
            Ok(()) => {
                tracing::debug!("日志配置: {:?}", config);
                Ok(())
            }
            // 其他组件（例如测试框架）已经安装了全局subscriber
            Err(e) if e.to_string().contains("already") => Ok(()),
            Err(e) => Err(anyhow::anyhow!("tracing subscriber初始化失败: {}", e)),
        }
    }

    /// 重置日志系统状态（主要用于测试）
    #[cfg(test)]
    pub fn reset_for_testing() {
        let mut state = global_state();
        state.initialized = false;
        state.init_error = None;
    }

    /// 记录一次运行的摘要
    ///
    /// 有运行错误、任务错误或未通过的检查项时以 warn 级别输出，否则为 info。
    pub fn run_log(run: &Run) {
        let task_errors = run.task_error_count();
        let failed_checks = run.failed_check_count();
        let duration_ms = run.duration.as_millis() as u64;
        let dial_ms = run.dial_duration.map(|d| d.as_millis() as u64).unwrap_or(0);

        if run.errors.is_empty() && task_errors == 0 && failed_checks == 0 {
            tracing::info!(
                host = %run.host_name,
                run_id = %run.id,
                tasks = run.tasks.len(),
                duration_ms,
                dial_ms,
                "RUN: 运行完成"
            );
            return;
        }

        tracing::warn!(
            host = %run.host_name,
            run_id = %run.id,
            tasks = run.tasks.len(),
            results = run.task_results.len(),
            errors = run.errors.len(),
            task_errors,
            failed_checks,
            duration_ms,
            dial_ms,
            "RUN: 运行存在失败"
        );

        for error in &run.errors {
            tracing::warn!(host = %run.host_name, kind = error.kind(), "运行错误: {}", error);
        }
        for result in &run.task_results {
            for error in &result.errors {
                tracing::warn!(
                    host = %run.host_name,
                    probe = %result.probe.name,
                    "任务错误: {}",
                    error
                );
            }
            for check in &result.failed_checks {
                tracing::warn!(
                    host = %run.host_name,
                    probe = %result.probe.name,
                    "检查未通过: {} ({})",
                    check.desc,
                    check.expr
                );
            }
            for line in &result.logs {
                tracing::debug!(host = %run.host_name, probe = %result.probe.name, "{}", line);
            }
        }
    }
}
