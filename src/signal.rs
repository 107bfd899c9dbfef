//! 信号处理模块
//!
//! 收到 SIGINT、SIGTERM 或 Ctrl+C 时取消关闭令牌，所有主机调度循环随之退出

use crate::error::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook_tokio::Signals;

/// 设置信号处理器
///
/// # 参数
/// * `shutdown` - 收到关闭信号时被取消的令牌
///
/// # 返回
/// * `Result<()>` - 注册结果
pub fn setup_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        setup_unix_signals(shutdown)
    }
    #[cfg(not(unix))]
    {
        setup_ctrl_c(shutdown);
        Ok(())
    }
}

/// Unix/Linux系统信号处理
#[cfg(unix)]
fn setup_unix_signals(shutdown: CancellationToken) -> Result<()> {
    use futures::stream::StreamExt;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    tokio::spawn(async move {
        tokio::select! {
            signal = signals.next() => match signal {
                Some(SIGINT) => info!("接收到 SIGINT 信号，开始优雅关闭..."),
                Some(SIGTERM) => info!("接收到 SIGTERM 信号，开始优雅关闭..."),
                Some(other) => info!("接收到信号 {}，开始优雅关闭...", other),
                None => return,
            },
            _ = shutdown.cancelled() => {
                handle.close();
                return;
            }
        }
        shutdown.cancel();
        handle.close();
    });

    Ok(())
}

/// 非Unix系统只监听 Ctrl+C
#[cfg(not(unix))]
fn setup_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("接收到 Ctrl+C，开始优雅关闭...");
                    shutdown.cancel();
                }
            }
            _ = shutdown.cancelled() => {}
        }
    });
}
