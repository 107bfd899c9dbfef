//! Host Vitals 主程序入口
//!
//! 基于SSH的无代理主机监控工具

use anyhow::{Context, Result};
use clap::Parser;
use host_vitals::cli::args::Args;
use host_vitals::cli::commands::command_for;
use host_vitals::logging::{LogConfig, LoggingSystem};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统
    let log_config = LogConfig {
        level: args.log_level.clone().into(),
        file_path: args.log_file.clone(),
        console: true,
        json_format: args.json_logs,
        module_levels: args.log_modules.iter().cloned().collect(),
    };

    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Host Vitals v{} 启动", host_vitals::VERSION);

    // 执行命令
    if let Err(e) = command_for(&args.command).execute(&args).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
