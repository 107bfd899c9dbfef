//! 探针定义
//!
//! 探针在加载后不可变，通过 `Arc<Probe>` 在所有匹配的任务之间共享

use crate::config::types::toml_value_to_string;
use crate::config::LoadedProbe;
use std::collections::HashMap;
use std::time::Duration;

/// 检查项：必须为真的条件
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    /// 描述
    pub desc: String,
    /// 条件表达式
    pub expr: String,
    /// 标签限制（目标表达式），为空时对所有主机生效
    pub classes: Vec<String>,
}

/// 探针
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    /// 名称
    pub name: String,
    /// 目标表达式
    pub targets: Vec<String>,
    /// 脚本文件名
    pub script: String,
    /// 脚本内容
    pub script_body: String,
    /// 脚本参数
    pub arguments: String,
    /// 执行间隔
    pub delay: Duration,
    /// 单次执行超时
    pub timeout: Duration,
    /// 默认绑定值
    pub defaults: HashMap<String, String>,
    /// 检查项
    pub checks: Vec<Check>,
}

impl Probe {
    /// 判断检查项是否适用于拥有这些标签的主机
    pub fn check_applies(check: &Check, classes: &[String]) -> bool {
        check.classes.is_empty() || super::target::matches(classes, &check.classes)
    }
}

impl From<LoadedProbe> for Probe {
    fn from(loaded: LoadedProbe) -> Self {
        let config = loaded.config;
        Self {
            name: config.name,
            targets: config.targets,
            script: config.script,
            script_body: loaded.script_body,
            arguments: config.arguments,
            delay: Duration::from_secs(config.delay_seconds),
            timeout: Duration::from_secs(config.timeout_seconds),
            defaults: config
                .defaults
                .iter()
                .map(|(k, v)| (k.clone(), toml_value_to_string(v)))
                .collect(),
            checks: config
                .checks
                .into_iter()
                .map(|c| Check {
                    desc: c.desc,
                    expr: c.expr,
                    classes: c.classes,
                })
                .collect(),
        }
    }
}
