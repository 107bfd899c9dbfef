//! 目标表达式匹配
//!
//! 探针的 `targets` 是一组目标表达式，每个表达式由 `&` 连接的标签组成。
//! 表达式内部为“与”，表达式之间为“或”。`*` 匹配任意主机。

/// 通配标签
pub const WILDCARD: &str = "*";

/// 判断主机是否拥有某个标签（`*` 总是满足）
pub fn has_class(classes: &[String], class: &str) -> bool {
    class == WILDCARD || classes.iter().any(|c| c == class)
}

/// 判断主机是否满足单个目标表达式
///
/// 不包含任何标签的表达式（例如空字符串）是零个条件中满足零个，
/// 因此匹配所有主机。其余表达式中的空标签（`web & `）不被任何主机满足。
pub fn matches_expression(classes: &[String], expression: &str) -> bool {
    let tokens: Vec<&str> = expression.split('&').map(str::trim).collect();
    if tokens.iter().all(|token| token.is_empty()) {
        return true;
    }
    tokens
        .iter()
        .all(|token| !token.is_empty() && has_class(classes, token))
}

/// 判断主机是否匹配任意一个目标表达式
///
/// # 参数
/// * `classes` - 主机标签
/// * `targets` - 探针目标表达式列表
///
/// # 返回
/// * `bool` - 是否匹配
pub fn matches(classes: &[String], targets: &[String]) -> bool {
    targets
        .iter()
        .any(|expression| matches_expression(classes, expression))
}
