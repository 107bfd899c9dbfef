//! 配置数据结构定义
//!
//! 定义根配置文件、主机声明文件和探针声明文件的结构体以及验证逻辑

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 根配置文件名
pub const ROOT_CONFIG_FILE: &str = "host-vitals.toml";
/// 主机声明目录
pub const HOSTS_DIR: &str = "hosts.d";
/// 探针声明目录
pub const PROBES_DIR: &str = "probes.d";
/// 探针脚本目录
pub const SCRIPTS_DIR: &str = "scripts";

/// 根配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 启动时间分散（秒），避免所有主机同时连接
    #[serde(default)]
    pub start_time_spread_seconds: u64,
    /// ssh 客户端可执行文件
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
    /// 告警消息模板（handlebars）
    pub alert_template: Option<String>,
    /// 恢复消息模板（handlebars）
    pub recovery_template: Option<String>,
    /// 告警通道列表
    #[serde(default)]
    pub alerts: Vec<AlertConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            start_time_spread_seconds: 0,
            ssh_binary: default_ssh_binary(),
            alert_template: None,
            recovery_template: None,
            alerts: Vec::new(),
        }
    }
}

/// 告警通道配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    /// 通道名称
    pub name: String,
    /// webhook URL
    pub url: String,
    /// 签名密钥
    pub secret: Option<String>,
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// 主机声明（hosts.d/*.toml）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// 主机名称，全局唯一
    pub name: String,
    /// 主机标签
    #[serde(default)]
    pub classes: Vec<String>,
    /// 是否禁用
    #[serde(default)]
    pub disabled: bool,
    /// 网络连接参数
    pub network: NetworkConfig,
    /// 默认绑定值
    #[serde(default)]
    pub defaults: HashMap<String, toml::Value>,
}

/// 主机连接参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// 主机地址
    pub host: String,
    /// SSH端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// 登录用户
    pub user: String,
    /// 私钥路径
    pub key: Option<String>,
    /// 连接耗时告警阈值（秒）
    #[serde(default = "default_conn_time_warn")]
    pub ssh_connection_time_warn_seconds: u64,
    /// 额外的 ssh -o 选项
    #[serde(default)]
    pub ssh_options: Vec<String>,
}

/// 探针声明（probes.d/*.toml）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// 探针名称，全局唯一
    pub name: String,
    /// 目标表达式
    pub targets: Vec<String>,
    /// 脚本文件名（相对 scripts/ 目录）
    pub script: String,
    /// 脚本参数
    #[serde(default)]
    pub arguments: String,
    /// 执行间隔（秒）
    #[serde(default = "default_delay")]
    pub delay_seconds: u64,
    /// 单个脚本超时时间（秒）
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,
    /// 是否禁用
    #[serde(default)]
    pub disabled: bool,
    /// 默认绑定值
    #[serde(default)]
    pub defaults: HashMap<String, toml::Value>,
    /// 检查项列表
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

/// 检查项声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckConfig {
    /// 描述
    pub desc: String,
    /// 必须为真的条件表达式
    pub expr: String,
    /// 仅对匹配这些标签表达式的主机生效
    #[serde(default)]
    pub classes: Vec<String>,
}

// 默认值函数
fn default_ssh_binary() -> String {
    "ssh".to_string()
}
fn default_enabled() -> bool {
    true
}
fn default_ssh_port() -> u16 {
    22
}
fn default_conn_time_warn() -> u64 {
    6
}
fn default_delay() -> u64 {
    60
}
fn default_probe_timeout() -> u64 {
    20
}

/// 探针最小执行间隔，与调度周期一致
pub const MIN_PROBE_DELAY_SECONDS: u64 = 60;
/// 探针最大执行间隔（一周）
pub const MAX_PROBE_DELAY_SECONDS: u64 = 7 * 24 * 3600;
/// SSH慢连接告警阈值上限，两倍阈值仍在一次运行的时限内
pub const MAX_CONNECTION_WARN_SECONDS: u64 = 29;
/// 单个探针超时上限，必须小于整次运行的超时
pub const MAX_PROBE_TIMEOUT_SECONDS: u64 = 59;

/// 将 toml 值转换为绑定使用的字符串
pub fn toml_value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 根配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_global_config(config: &GlobalConfig) -> Result<(), String> {
    if config.ssh_binary.trim().is_empty() {
        return Err("ssh_binary 不能为空".to_string());
    }

    for alert in &config.alerts {
        if alert.name.trim().is_empty() {
            return Err("告警通道名称不能为空".to_string());
        }
        if !alert.url.starts_with("http://") && !alert.url.starts_with("https://") {
            return Err(format!("告警通道 {} 的URL格式无效", alert.name));
        }
    }

    Ok(())
}

/// 主机声明验证函数
pub fn validate_host_config(host: &HostConfig) -> Result<(), String> {
    if host.name.trim().is_empty() {
        return Err("主机名称不能为空".to_string());
    }

    if host.network.host.trim().is_empty() {
        return Err(format!("主机 {} 的地址不能为空", host.name));
    }

    if host.network.user.trim().is_empty() {
        return Err(format!("主机 {} 的登录用户不能为空", host.name));
    }

    if host.network.port == 0 {
        return Err(format!("主机 {} 的端口不能为0", host.name));
    }

    let warn = host.network.ssh_connection_time_warn_seconds;
    if warn == 0 || warn > MAX_CONNECTION_WARN_SECONDS {
        return Err(format!(
            "主机 {} 的 ssh_connection_time_warn_seconds 必须在1到{}秒之间",
            host.name, MAX_CONNECTION_WARN_SECONDS
        ));
    }

    Ok(())
}

/// 探针声明验证函数
pub fn validate_probe_config(probe: &ProbeConfig) -> Result<(), String> {
    if probe.name.trim().is_empty() {
        return Err("探针名称不能为空".to_string());
    }

    if probe.targets.is_empty() {
        return Err(format!("探针 {} 必须指定至少一个目标表达式", probe.name));
    }

    if probe.script.trim().is_empty() {
        return Err(format!("探针 {} 的脚本不能为空", probe.name));
    }

    if probe.delay_seconds < MIN_PROBE_DELAY_SECONDS {
        return Err(format!(
            "探针 {} 的执行间隔不能小于{}秒",
            probe.name, MIN_PROBE_DELAY_SECONDS
        ));
    }

    if probe.delay_seconds > MAX_PROBE_DELAY_SECONDS {
        return Err(format!(
            "探针 {} 的执行间隔不能大于{}秒",
            probe.name, MAX_PROBE_DELAY_SECONDS
        ));
    }

    if probe.timeout_seconds == 0 || probe.timeout_seconds > MAX_PROBE_TIMEOUT_SECONDS {
        return Err(format!(
            "探针 {} 的超时时间必须在1到{}秒之间",
            probe.name, MAX_PROBE_TIMEOUT_SECONDS
        ));
    }

    for check in &probe.checks {
        if check.desc.trim().is_empty() {
            return Err(format!("探针 {} 存在没有描述的检查项", probe.name));
        }
        if check.expr.trim().is_empty() {
            return Err(format!(
                "探针 {} 的检查项 '{}' 表达式为空",
                probe.name, check.desc
            ));
        }
    }

    Ok(())
}
