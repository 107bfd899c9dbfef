//! 基于 OpenSSH 客户端的连接实现
//!
//! `connect` 启动一个复用的 master 连接（ControlMaster），之后每个会话都通过
//! 控制套接字执行命令，`close` 通知 master 退出。所有子进程都设置了
//! `kill_on_drop`，会话被丢弃时本地 ssh 进程随之结束，远程命令也会收到挂断。

use crate::config::{GlobalConfig, HostConfig};
use crate::error::ConnectionError;
use crate::monitor::connection::{Connection, Session, SessionOutput};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// ssh 以 255 退出表示连接层错误
const SSH_ERROR_STATUS: i32 = 255;

/// OpenSSH 连接
#[derive(Debug, Clone)]
pub struct SshConnection {
    /// ssh 可执行文件
    binary: String,
    /// 主机地址
    host: String,
    /// 端口
    port: u16,
    /// 登录用户
    user: String,
    /// 私钥路径
    key: Option<String>,
    /// 额外选项
    options: Vec<String>,
    /// 连接耗时告警阈值
    time_warn: Duration,
    /// 控制套接字路径，连接建立后存在
    control_path: Option<PathBuf>,
}

impl SshConnection {
    /// 根据主机声明创建连接
    pub fn from_config(host: &HostConfig, global: &GlobalConfig) -> Self {
        Self {
            binary: global.ssh_binary.clone(),
            host: host.network.host.clone(),
            port: host.network.port,
            user: host.network.user.clone(),
            key: host.network.key.clone(),
            options: host.network.ssh_options.clone(),
            time_warn: Duration::from_secs(host.network.ssh_connection_time_warn_seconds),
            control_path: None,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// 所有 ssh 调用共用的参数
    fn common_args(&self, control_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            control_path.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(ref key) = self.key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }

    /// master 连接参数
    fn master_args(&self, control_path: &Path) -> Vec<String> {
        let mut args = vec!["-M".to_string()];
        args.extend(self.common_args(control_path));
        args.extend([
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", (self.time_warn * 2).as_secs().max(1)),
            "-f".to_string(),
            "-N".to_string(),
            self.destination(),
        ]);
        args
    }
}

#[async_trait]
impl Connection for SshConnection {
    fn target(&self) -> String {
        format!("{}:{}", self.destination(), self.port)
    }

    fn connection_time_warn(&self) -> Duration {
        self.time_warn
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let control_path =
            std::env::temp_dir().join(format!("host-vitals-{}.sock", Uuid::new_v4().simple()));

        debug!("建立SSH master连接: {}", self.target());

        let output = Command::new(&self.binary)
            .args(self.master_args(&control_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConnectionError::ConnectFailed {
                target: self.target(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ConnectionError::ConnectFailed {
                target: self.target(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        self.control_path = Some(control_path);
        Ok(())
    }

    async fn close(&mut self) {
        let Some(control_path) = self.control_path.take() else {
            return;
        };

        let mut args = self.common_args(&control_path);
        args.extend(["-O".to_string(), "exit".to_string(), self.destination()]);

        let result = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        if let Err(e) = result {
            warn!("关闭SSH master连接失败 {}: {}", self.target(), e);
        }

        let _ = tokio::fs::remove_file(&control_path).await;
    }

    async fn open_session(&mut self) -> Result<Box<dyn Session>, ConnectionError> {
        let control_path = self
            .control_path
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?;

        let mut args = self.common_args(control_path);
        args.push(self.destination());

        Ok(Box::new(SshSession {
            binary: self.binary.clone(),
            args,
        }))
    }
}

/// 通过控制套接字执行命令的会话
#[derive(Debug)]
struct SshSession {
    binary: String,
    args: Vec<String>,
}

#[async_trait]
impl Session for SshSession {
    async fn run(&mut self, command: &str, stdin: &str) -> Result<SessionOutput, ConnectionError> {
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConnectionError::Session(e.to_string()))?;

        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConnectionError::Session("无法获取标准输入".to_string()))?;
        let input = stdin.as_bytes().to_vec();

        let write = async move {
            let result = child_stdin.write_all(&input).await;
            drop(child_stdin);
            result
        };

        let (write_result, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| ConnectionError::Command(e.to_string()))?;

        if let Err(e) = write_result {
            debug!("写入远程标准输入失败: {}", e);
        }

        let exit_status = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if exit_status == Some(SSH_ERROR_STATUS) {
            return Err(ConnectionError::Command(format!(
                "ssh exited with status {}: {}",
                SSH_ERROR_STATUS,
                stderr.trim()
            )));
        }

        Ok(SessionOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            exit_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use std::collections::HashMap;

    fn host_config() -> HostConfig {
        HostConfig {
            name: "web-01".to_string(),
            classes: vec!["web".to_string()],
            disabled: false,
            network: NetworkConfig {
                host: "10.0.0.1".to_string(),
                port: 2222,
                user: "monitor".to_string(),
                key: Some("/keys/id_ed25519".to_string()),
                ssh_connection_time_warn_seconds: 3,
                ssh_options: vec!["StrictHostKeyChecking=accept-new".to_string()],
            },
            defaults: HashMap::new(),
        }
    }

    #[test]
    fn test_target_and_threshold() {
        let conn = SshConnection::from_config(&host_config(), &GlobalConfig::default());
        assert_eq!(conn.target(), "monitor@10.0.0.1:2222");
        assert_eq!(conn.connection_time_warn(), Duration::from_secs(3));
    }

    #[test]
    fn test_master_args() {
        let conn = SshConnection::from_config(&host_config(), &GlobalConfig::default());
        let args = conn.master_args(&PathBuf::from("/tmp/x.sock"));

        assert_eq!(args[0], "-M");
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id_ed25519"]));
        assert!(args.contains(&"ConnectTimeout=6".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert_eq!(args.last().unwrap(), "monitor@10.0.0.1");
    }

    #[tokio::test]
    async fn test_open_session_requires_connection() {
        let mut conn = SshConnection::from_config(&host_config(), &GlobalConfig::default());
        let result = conn.open_session().await;
        assert!(matches!(result, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let mut conn = SshConnection::from_config(&host_config(), &GlobalConfig::default());
        conn.close().await;
        assert!(conn.control_path.is_none());
    }
}
