//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{ConfigLoader, ConfigTree, GlobalConfig, HostConfig, TomlConfigLoader};
use crate::error::Result;
use crate::monitor::{
    build_fleet, run_fleet, Connection, FailureRegistry, Host, SimpleEvaluator, SshConnection,
};
use crate::notification::sender::{MessageType, NotificationMessage};
use crate::notification::AlertDispatcher;
use crate::signal::setup_signal_handlers;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 加载配置树
async fn load_config(args: &Args) -> Result<ConfigTree> {
    let loader = TomlConfigLoader::new(true);
    loader.load_tree(args.get_config_path()).await
}

fn ssh_connector(host: &HostConfig, global: &GlobalConfig) -> Box<dyn Connection> {
    Box::new(SshConnection::from_config(host, global))
}

/// 运行命令
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let tree = load_config(args).await?;

        let shutdown = CancellationToken::new();
        setup_signal_handlers(shutdown.clone())?;

        let alerter = Arc::new(AlertDispatcher::from_config(&tree.global)?);
        let senders: Vec<&str> = alerter.senders().iter().map(|s| s.name()).collect();
        info!("告警通道: {}", senders.join(", "));

        let hosts = build_fleet(&tree, ssh_connector, Instant::now());
        if hosts.is_empty() {
            warn!("没有启用的主机，等待关闭信号");
        }

        let spread = Duration::from_secs(tree.global.start_time_spread_seconds);
        let stats = run_fleet(
            hosts,
            Arc::new(SimpleEvaluator::new()),
            FailureRegistry::new(),
            alerter,
            spread,
            shutdown.clone(),
        )
        .await;

        // 没有主机时run_fleet立即返回
        shutdown.cancelled().await;

        for (host, stats) in stats {
            info!(
                host = %host,
                ticks = stats.ticks,
                runs = stats.runs,
                overruns = stats.overruns,
                replays = stats.replays,
                expedited = stats.expedited,
                "主机调度循环已停止"
            );
        }

        info!("监控已停止");
        Ok(())
    }
}

/// 单台主机的连接测试结果
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    /// 主机名称
    pub host: String,
    /// 是否成功
    pub ok: bool,
    /// 连接耗时（毫秒）
    pub dial_ms: Option<u64>,
    /// 错误信息
    pub error: Option<String>,
}

/// 连接测试命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Check { host, format } = &args.command {
            let tree = load_config(args).await?;
            let hosts: Vec<Host> = build_fleet(&tree, ssh_connector, Instant::now())
                .into_iter()
                .filter(|h| host.as_deref().map_or(true, |name| h.name == name))
                .collect();

            if hosts.is_empty() {
                match host {
                    Some(name) => eprintln!("未找到名为 '{name}' 的启用主机"),
                    None => eprintln!("未找到任何启用的主机"),
                }
                return Ok(());
            }

            let reports = self.check_hosts(hosts).await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
                OutputFormat::Text => self.print_text_results(&reports),
            }
        }
        Ok(())
    }
}

impl CheckCommand {
    /// 并发测试所有主机的连接
    pub async fn check_hosts(&self, hosts: Vec<Host>) -> Vec<ConnectionReport> {
        let checks = hosts.into_iter().map(|mut host| async move {
            let result = host.test_connection().await;
            match result {
                Ok(dial) => ConnectionReport {
                    host: host.name,
                    ok: true,
                    dial_ms: Some(dial.as_millis() as u64),
                    error: None,
                },
                Err(e) => ConnectionReport {
                    host: host.name,
                    ok: false,
                    dial_ms: None,
                    error: Some(e.to_string()),
                },
            }
        });
        join_all(checks).await
    }

    fn print_text_results(&self, reports: &[ConnectionReport]) {
        for report in reports {
            match (&report.error, report.dial_ms) {
                (None, Some(ms)) => println!("✓ {} - {}ms", report.host, ms),
                (Some(error), _) => println!("✗ {} - {}", report.host, error),
                (None, None) => println!("✗ {}", report.host),
            }
        }
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate { verbose } = &args.command {
            println!("验证配置目录: {}", args.get_config_path().display());
            let tree = load_config(args).await?;

            if *verbose {
                let hosts = build_fleet(&tree, ssh_connector, Instant::now());
                println!("全局配置:");
                println!("  启动错开: {}秒", tree.global.start_time_spread_seconds);
                println!("  ssh: {}", tree.global.ssh_binary);
                println!("  告警通道: {}", tree.global.alerts.len());

                println!("主机:");
                for host in &hosts {
                    println!("  {} [{}]", host.name, host.classes.join(", "));
                    for task in &host.tasks {
                        println!(
                            "     - {} (每 {}秒)",
                            task.probe.name,
                            task.probe.delay.as_secs()
                        );
                    }
                }
            }

            println!("✓ 配置验证通过");
            println!("✓ 找到 {} 个主机", tree.hosts.len());
            println!("✓ 找到 {} 个探针", tree.probes.len());
        }
        Ok(())
    }
}

/// 测试通知命令
pub struct TestNotificationCommand;

#[async_trait]
impl Command for TestNotificationCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::TestNotification { message } = &args.command {
            let tree = load_config(args).await?;
            let dispatcher = AlertDispatcher::from_config(&tree.global)?;

            let notification = NotificationMessage {
                title: "Host Vitals 测试通知".to_string(),
                content: message.clone(),
                host_name: "host-vitals".to_string(),
                message_type: MessageType::Info,
            };

            for sender in dispatcher.senders() {
                match sender.send_message(&notification).await {
                    Ok(()) => println!("✓ {} 发送成功", sender.name()),
                    Err(e) => println!("✗ {} 发送失败: {}", sender.name(), e),
                }
            }
        }
        Ok(())
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

/// 根据子命令选择处理器
pub fn command_for(command: &Commands) -> Box<dyn Command> {
    match command {
        Commands::Run => Box::new(RunCommand),
        Commands::Check { .. } => Box::new(CheckCommand),
        Commands::Validate { .. } => Box::new(ValidateCommand),
        Commands::TestNotification { .. } => Box::new(TestNotificationCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    }
}
