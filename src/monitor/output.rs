//! 引导脚本与输出解析
//!
//! 一次运行只打开一个远程会话，执行 `bash -s --`，并通过标准输入发送引导脚本。
//! 引导脚本依次执行每个到期任务的脚本，用标记行包围各自的输出：
//!
//! ```text
//! __HV_BEGIN <index> <epoch>
//! KEY: value
//! ERROR: message
//! __HV_END <index> <exit status> <epoch>
//! ```

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

/// 远程引导命令
pub const BOOTSTRAP: &str = "bash -s --";

const BEGIN_MARKER: &str = "__HV_BEGIN";
const END_MARKER: &str = "__HV_END";

/// `timeout` 命令超时时的退出码
pub const TIMEOUT_EXIT_STATUS: i32 = 124;

/// 引导脚本中的一条脚本调用
#[derive(Debug, Clone)]
pub struct ScriptCommand<'a> {
    /// 任务在本次运行中的序号
    pub index: usize,
    /// 脚本内容
    pub script: &'a str,
    /// 脚本参数
    pub arguments: &'a str,
    /// 脚本超时
    pub timeout: Duration,
}

/// 生成引导脚本
///
/// # 参数
/// * `commands` - 脚本调用列表
/// * `delimiter` - here-document 分隔符，不能出现在任何脚本中
///
/// # 返回
/// * `String` - 通过标准输入发送的脚本
pub fn bootstrap_script(commands: &[ScriptCommand<'_>], delimiter: &str) -> String {
    let mut out = String::new();

    for command in commands {
        let timeout = command.timeout.as_secs().max(1);
        let _ = writeln!(out, "echo \"{} {} $(date +%s)\"", BEGIN_MARKER, command.index);
        let _ = writeln!(
            out,
            "timeout {} bash -s -- {} 2>&1 <<'{}'",
            timeout, command.arguments, delimiter
        );
        out.push_str(command.script);
        if !command.script.ends_with('\n') {
            out.push('\n');
        }
        let _ = writeln!(out, "{}", delimiter);
        let _ = writeln!(
            out,
            "echo \"{} {} $? $(date +%s)\"",
            END_MARKER, command.index
        );
    }

    out
}

/// 单个任务的解析结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTask {
    /// 脚本输出的键值
    pub values: HashMap<String, String>,
    /// 脚本报告的错误
    pub errors: Vec<String>,
    /// 其余输出行
    pub logs: Vec<String>,
    /// 退出码，没有结束标记时为 None
    pub exit_status: Option<i32>,
    /// 开始时间（远程 epoch 秒）
    pub started_at: Option<i64>,
    /// 结束时间（远程 epoch 秒）
    pub ended_at: Option<i64>,
}

impl ParsedTask {
    /// 远程测得的执行时长
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) if end >= start => Duration::from_secs((end - start) as u64),
            _ => Duration::ZERO,
        }
    }
}

/// 解析引导脚本的输出
///
/// # 参数
/// * `stdout` - 远程标准输出
///
/// # 返回
/// * `HashMap<usize, ParsedTask>` - 按任务序号索引的解析结果
pub fn parse_output(stdout: &str) -> HashMap<usize, ParsedTask> {
    let mut parsed: HashMap<usize, ParsedTask> = HashMap::new();
    let mut current: Option<usize> = None;

    for line in stdout.lines() {
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix(BEGIN_MARKER) {
            let mut fields = rest.split_whitespace();
            if let Some(index) = fields.next().and_then(|f| f.parse::<usize>().ok()) {
                let entry = parsed.entry(index).or_default();
                entry.started_at = fields.next().and_then(|f| f.parse().ok());
                current = Some(index);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(END_MARKER) {
            let mut fields = rest.split_whitespace();
            if let Some(index) = fields.next().and_then(|f| f.parse::<usize>().ok()) {
                let entry = parsed.entry(index).or_default();
                entry.exit_status = fields.next().and_then(|f| f.parse().ok());
                entry.ended_at = fields.next().and_then(|f| f.parse().ok());
            }
            current = None;
            continue;
        }

        let Some(index) = current else {
            continue;
        };
        let entry = parsed.entry(index).or_default();

        if let Some((key, value)) = split_value_line(line) {
            let value = value.trim().to_string();
            if key == "ERROR" {
                entry.errors.push(value);
            } else {
                entry.values.insert(key.to_string(), value);
            }
        } else if !line.trim().is_empty() {
            entry.logs.push(line.to_string());
        }
    }

    parsed
}

/// 拆分 `KEY: value` 行，KEY 由大写字母、数字和下划线组成且以字母开头
fn split_value_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let mut chars = key.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        return None;
    }
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_script_layout() {
        let commands = vec![
            ScriptCommand {
                index: 0,
                script: "echo LOAD: 0.5",
                arguments: "",
                timeout: Duration::from_secs(20),
            },
            ScriptCommand {
                index: 1,
                script: "df -h \"$1\"\n",
                arguments: "/var",
                timeout: Duration::from_secs(5),
            },
        ];

        let script = bootstrap_script(&commands, "__HV_EOF_x");
        let lines: Vec<&str> = script.lines().collect();

        assert_eq!(lines[0], "echo \"__HV_BEGIN 0 $(date +%s)\"");
        assert_eq!(lines[1], "timeout 20 bash -s --  2>&1 <<'__HV_EOF_x'");
        assert_eq!(lines[2], "echo LOAD: 0.5");
        assert_eq!(lines[3], "__HV_EOF_x");
        assert_eq!(lines[4], "echo \"__HV_END 0 $? $(date +%s)\"");
        assert_eq!(lines[6], "timeout 5 bash -s -- /var 2>&1 <<'__HV_EOF_x'");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn test_parse_output() {
        let stdout = "\
__HV_BEGIN 0 1700000000
LOAD: 0.52
MEM_FREE:  1024
ERROR: sensor missing
something else
__HV_END 0 0 1700000002
__HV_BEGIN 1 1700000002
__HV_END 1 124 1700000022
";
        let parsed = parse_output(stdout);

        let first = &parsed[&0];
        assert_eq!(first.values["LOAD"], "0.52");
        assert_eq!(first.values["MEM_FREE"], "1024");
        assert_eq!(first.errors, vec!["sensor missing"]);
        assert_eq!(first.logs, vec!["something else"]);
        assert_eq!(first.exit_status, Some(0));
        assert_eq!(first.duration(), Duration::from_secs(2));

        let second = &parsed[&1];
        assert_eq!(second.exit_status, Some(TIMEOUT_EXIT_STATUS));
        assert!(second.values.is_empty());
    }

    #[test]
    fn test_parse_output_unterminated_task() {
        let parsed = parse_output("__HV_BEGIN 3 10\nLOAD: 1\n");
        let task = &parsed[&3];
        assert_eq!(task.values["LOAD"], "1");
        assert_eq!(task.exit_status, None);
        assert_eq!(task.duration(), Duration::ZERO);
    }

    #[test]
    fn test_split_value_line() {
        assert_eq!(split_value_line("LOAD_1M: 0.5"), Some(("LOAD_1M", " 0.5")));
        assert_eq!(split_value_line("load: 0.5"), None);
        assert_eq!(split_value_line("1LOAD: 0.5"), None);
        assert_eq!(split_value_line("no colon here"), None);
        assert_eq!(split_value_line("Filesystem Size: x"), None);
    }

    #[test]
    fn test_lines_outside_markers_are_ignored() {
        let parsed = parse_output("motd banner\nLOAD: 9\n");
        assert!(parsed.is_empty());
    }
}
