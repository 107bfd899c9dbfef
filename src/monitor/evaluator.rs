//! 检查项求值
//!
//! 调度器通过 [`CheckEvaluator`] trait 对检查项表达式求值，默认实现
//! [`SimpleEvaluator`] 支持一个很小的谓词语言：
//!
//! ```text
//! or      := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | '(' or ')' | cmp
//! cmp     := operand (('==' | '!=' | '<' | '<=' | '>' | '>=') operand)?
//! operand := IDENT | NUMBER | STRING | true | false | has_class("tag")
//! ```
//!
//! 求值失败一律按检查未通过处理。

use crate::monitor::probe::Probe;
use crate::monitor::run::TaskResult;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// 求值错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// 表达式语法错误
    #[error("表达式语法错误: {0}")]
    Syntax(String),

    /// 未绑定的标识符
    #[error("未定义的变量: {0}")]
    UnknownIdentifier(String),

    /// 无法比较的操作数
    #[error("无法比较: {0}")]
    TypeMismatch(String),
}

/// 求值时可见的绑定
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    /// 键值绑定
    pub values: HashMap<String, String>,
    /// 主机标签
    pub classes: Vec<String>,
}

impl Bindings {
    /// 合并绑定：探针默认值 < 主机默认值 < 任务输出
    ///
    /// # 参数
    /// * `probe_defaults` - 探针默认值
    /// * `host_defaults` - 主机默认值
    /// * `values` - 任务输出的键值
    /// * `classes` - 主机标签
    pub fn merged(
        probe_defaults: &HashMap<String, String>,
        host_defaults: &HashMap<String, String>,
        values: &HashMap<String, String>,
        classes: &[String],
    ) -> Self {
        let mut merged = probe_defaults.clone();
        merged.extend(host_defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            values: merged,
            classes: classes.to_vec(),
        }
    }
}

/// 检查项求值器
pub trait CheckEvaluator: Send + Sync {
    /// 对表达式求值
    ///
    /// # 参数
    /// * `expression` - 检查项表达式
    /// * `bindings` - 绑定
    ///
    /// # 返回
    /// * `Result<bool, EvalError>` - 检查是否通过
    fn evaluate(&self, expression: &str, bindings: &Bindings) -> Result<bool, EvalError>;
}

/// 对任务结果执行探针的检查项
///
/// 任务本身有错误时不执行检查；不适用于主机标签的检查项被跳过；
/// 求值出错的检查项计为未通过，错误写入任务日志。
///
/// # 参数
/// * `evaluator` - 求值器
/// * `result` - 任务结果，未通过的检查项追加到 `failed_checks`
/// * `host_defaults` - 主机默认值
/// * `classes` - 主机标签
pub fn evaluate_checks(
    evaluator: &dyn CheckEvaluator,
    result: &mut TaskResult,
    host_defaults: &HashMap<String, String>,
    classes: &[String],
) {
    if !result.is_success() {
        return;
    }

    let probe = std::sync::Arc::clone(&result.probe);
    let bindings = Bindings::merged(&probe.defaults, host_defaults, &result.values, classes);

    for check in &probe.checks {
        if !Probe::check_applies(check, classes) {
            continue;
        }
        match evaluator.evaluate(&check.expr, &bindings) {
            Ok(true) => {}
            Ok(false) => result.failed_checks.push(check.clone()),
            Err(e) => {
                warn!("检查项 '{}' 求值失败 ({}): {}", check.desc, probe.name, e);
                result
                    .logs
                    .push(format!("检查项 '{}' 求值失败: {}", check.desc, e));
                result.failed_checks.push(check.clone());
            }
        }
    }
}

/// 默认求值器
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    /// 创建求值器
    pub fn new() -> Self {
        Self
    }
}

impl CheckEvaluator for SimpleEvaluator {
    fn evaluate(&self, expression: &str, bindings: &Bindings) -> Result<bool, EvalError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(EvalError::Syntax(format!("多余的符号 {:?}", token)));
        }
        expr.eval(bindings)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    ('>', true) => CmpOp::Ge,
                    _ => CmpOp::Gt,
                };
                tokens.push(Token::Cmp(op));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| EvalError::Syntax("字符串未结束".to_string()))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::Syntax(format!("无效的数字 {}", text)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(EvalError::Syntax(format!("无法识别的字符 '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Ident(String),
    Number(f64),
    Str(String),
    Bool(bool),
    HasClass(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Cmp(Operand, CmpOp, Operand),
    Bare(Operand),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(ref token) if *token == expected => Ok(()),
            other => Err(EvalError::Syntax(format!(
                "期望 {:?}，实际为 {:?}",
                expected, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => self.parse_cmp(),
        }
    }

    fn parse_cmp(&mut self) -> Result<Expr, EvalError> {
        let left = self.parse_operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Cmp(left, op, right));
        }
        Ok(Expr::Bare(left))
    }

    fn parse_operand(&mut self) -> Result<Operand, EvalError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Str(s)) => Ok(Operand::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Operand::Bool(true)),
                "false" => Ok(Operand::Bool(false)),
                "has_class" => {
                    self.expect(Token::LParen)?;
                    let class = match self.next() {
                        Some(Token::Str(s)) | Some(Token::Ident(s)) => s,
                        other => {
                            return Err(EvalError::Syntax(format!(
                                "has_class 需要标签参数，实际为 {:?}",
                                other
                            )))
                        }
                    };
                    self.expect(Token::RParen)?;
                    Ok(Operand::HasClass(class))
                }
                _ => Ok(Operand::Ident(name)),
            },
            other => Err(EvalError::Syntax(format!("期望操作数，实际为 {:?}", other))),
        }
    }
}

/// 操作数的运行时值
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Value::Number(n) => n.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => match s.trim() {
                "true" => true,
                other => other.parse::<f64>().is_ok_and(|n| n != 0.0),
            },
        }
    }
}

impl Operand {
    fn resolve(&self, bindings: &Bindings) -> Result<Value, EvalError> {
        match self {
            Operand::Number(n) => Ok(Value::Number(*n)),
            Operand::Str(s) => Ok(Value::Text(s.clone())),
            Operand::Bool(b) => Ok(Value::Bool(*b)),
            Operand::HasClass(class) => Ok(Value::Bool(
                bindings.classes.iter().any(|c| c == class),
            )),
            Operand::Ident(name) => bindings
                .values
                .get(name)
                .map(|v| Value::Text(v.clone()))
                .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        }
    }
}

impl Expr {
    fn eval(&self, bindings: &Bindings) -> Result<bool, EvalError> {
        match self {
            Expr::Or(terms) => {
                for term in terms {
                    if term.eval(bindings)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::And(terms) => {
                for term in terms {
                    if !term.eval(bindings)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Not(inner) => Ok(!inner.eval(bindings)?),
            Expr::Bare(operand) => Ok(operand.resolve(bindings)?.is_truthy()),
            Expr::Cmp(left, op, right) => {
                let left = left.resolve(bindings)?;
                let right = right.resolve(bindings)?;
                compare(&left, *op, &right)
            }
        }
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool, EvalError> {
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return Ok(match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        });
    }

    let (l, r) = (left.as_text(), right.as_text());
    match op {
        CmpOp::Eq => Ok(l == r),
        CmpOp::Ne => Ok(l != r),
        _ => Err(EvalError::TypeMismatch(format!(
            "'{}' 与 '{}' 不是数字，不能比较大小",
            l, r
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::probe::Check;
    use crate::monitor::task::Task;
    use std::sync::Arc;
    use std::time::Duration;

    fn bindings() -> Bindings {
        let mut values = HashMap::new();
        values.insert("LOAD".to_string(), "0.75".to_string());
        values.insert("LOAD_MAX".to_string(), "4".to_string());
        values.insert("STATE".to_string(), "running".to_string());
        values.insert("ENABLED".to_string(), "true".to_string());
        Bindings {
            values,
            classes: vec!["web".to_string(), "prod".to_string()],
        }
    }

    fn eval(expr: &str) -> Result<bool, EvalError> {
        SimpleEvaluator::new().evaluate(expr, &bindings())
    }

    #[test]
    fn test_numeric_comparisons() {
        assert_eq!(eval("LOAD < LOAD_MAX"), Ok(true));
        assert_eq!(eval("LOAD >= 1"), Ok(false));
        assert_eq!(eval("LOAD_MAX == 4.0"), Ok(true));
        assert_eq!(eval("-1 < LOAD"), Ok(true));
    }

    #[test]
    fn test_string_and_bool() {
        assert_eq!(eval("STATE == \"running\""), Ok(true));
        assert_eq!(eval("STATE != 'stopped'"), Ok(true));
        assert_eq!(eval("ENABLED"), Ok(true));
        assert_eq!(eval("ENABLED == true"), Ok(true));
        assert!(matches!(eval("STATE < 3"), Err(EvalError::TypeMismatch(_))));
    }

    #[test]
    fn test_logic_and_precedence() {
        assert_eq!(eval("LOAD > 1 || STATE == 'running' && has_class('prod')"), Ok(true));
        assert_eq!(eval("(LOAD > 1 || false) && true"), Ok(false));
        assert_eq!(eval("!has_class(\"db\")"), Ok(true));
        assert_eq!(eval("!(LOAD < 1)"), Ok(false));
    }

    #[test]
    fn test_short_circuit_skips_missing_identifier() {
        assert_eq!(eval("true || MISSING > 1"), Ok(true));
        assert_eq!(
            eval("MISSING > 1"),
            Err(EvalError::UnknownIdentifier("MISSING".to_string()))
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(eval("LOAD <"), Err(EvalError::Syntax(_))));
        assert!(matches!(eval("(LOAD < 1"), Err(EvalError::Syntax(_))));
        assert!(matches!(eval("LOAD < 1 2"), Err(EvalError::Syntax(_))));
        assert!(matches!(eval("'open"), Err(EvalError::Syntax(_))));
        assert!(matches!(eval("LOAD ~ 1"), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn test_merged_bindings_precedence() {
        let mut probe = HashMap::new();
        probe.insert("MAX".to_string(), "1".to_string());
        probe.insert("MIN".to_string(), "0".to_string());
        let mut host = HashMap::new();
        host.insert("MAX".to_string(), "2".to_string());
        let mut values = HashMap::new();
        values.insert("MIN".to_string(), "5".to_string());

        let merged = Bindings::merged(&probe, &host, &values, &[]);
        assert_eq!(merged.values["MAX"], "2");
        assert_eq!(merged.values["MIN"], "5");
    }

    fn result_with_checks(checks: Vec<Check>) -> TaskResult {
        let probe = Arc::new(Probe {
            name: "load".to_string(),
            targets: vec!["*".to_string()],
            script: "load.sh".to_string(),
            script_body: String::new(),
            arguments: String::new(),
            delay: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            defaults: HashMap::from([("LOAD_MAX".to_string(), "1".to_string())]),
            checks,
        });
        let task = Task::new(probe, tokio::time::Instant::now());
        let mut result = TaskResult::new(0, &task);
        result.values.insert("LOAD".to_string(), "2".to_string());
        result
    }

    fn check(desc: &str, expr: &str, classes: &[&str]) -> Check {
        Check {
            desc: desc.to_string(),
            expr: expr.to_string(),
            classes: classes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_evaluate_checks_fails_closed_and_respects_classes() {
        let mut result = result_with_checks(vec![
            check("load", "LOAD < LOAD_MAX", &[]),
            check("broken", "NOPE > 1", &[]),
            check("staging only", "false", &["staging"]),
            check("ok", "LOAD > 0", &[]),
        ]);
        let classes = vec!["prod".to_string()];

        evaluate_checks(&SimpleEvaluator, &mut result, &HashMap::new(), &classes);

        let failed: Vec<&str> = result.failed_checks.iter().map(|c| c.desc.as_str()).collect();
        assert_eq!(failed, vec!["load", "broken"]);
        assert_eq!(result.logs.len(), 1);
    }

    #[test]
    fn test_evaluate_checks_uses_host_defaults() {
        let mut result = result_with_checks(vec![check("load", "LOAD < LOAD_MAX", &[])]);
        let host_defaults = HashMap::from([("LOAD_MAX".to_string(), "8".to_string())]);

        evaluate_checks(&SimpleEvaluator, &mut result, &host_defaults, &[]);
        assert!(result.failed_checks.is_empty());
    }

    #[test]
    fn test_evaluate_checks_skips_errored_results() {
        let mut result = result_with_checks(vec![check("load", "false", &[])]);
        result.errors.push("exit status 2".to_string());

        evaluate_checks(&SimpleEvaluator, &mut result, &HashMap::new(), &[]);
        assert!(result.failed_checks.is_empty());
    }
}
