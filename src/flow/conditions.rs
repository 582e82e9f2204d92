use crate::flow::nodes::{Condition, ConditionNode, ConditionOperator};
use crate::flow::types::FlowVariable;
use crate::flow::value::{FlowValue, Variables};

/// Flow 条件求值，纯函数，不修改会话

/// 对单个条件求值
pub fn evaluate(condition: &Condition, variables: &Variables, declared: &[FlowVariable]) -> bool {
    let actual = variables.get(&condition.field);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => actual.unwrap_or(&FlowValue::Null) == expected,
        ConditionOperator::NotEquals => actual.unwrap_or(&FlowValue::Null) != expected,
        ConditionOperator::Contains => actual.is_some_and(|value| contains(value, expected)),
        ConditionOperator::GreaterThan => compare(actual, expected, |a, b| a > b),
        ConditionOperator::LessThan => compare(actual, expected, |a, b| a < b),
        ConditionOperator::Exists => actual.is_some_and(|value| !value.is_null()),
        ConditionOperator::Complete => is_complete(variables, declared),
    }
}

/// 按数组顺序求值，返回第一个成立条件的下标
pub fn select_branch(
    node: &ConditionNode,
    variables: &Variables,
    declared: &[FlowVariable],
) -> Option<usize> {
    node.conditions
        .iter()
        .position(|condition| evaluate(condition, variables, declared))
}

/// 所有声明变量均已绑定非空值
pub fn is_complete(variables: &Variables, declared: &[FlowVariable]) -> bool {
    declared.iter().all(|variable| {
        variables
            .get(&variable.name)
            .is_some_and(|value| !value.is_null())
    })
}

fn contains(actual: &FlowValue, expected: &FlowValue) -> bool {
    match actual {
        FlowValue::String(text) => expected
            .as_str()
            .is_some_and(|needle| text.contains(needle)),
        FlowValue::List(items) => items.iter().any(|item| item == expected),
        FlowValue::Map(map) => expected.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

fn compare(actual: Option<&FlowValue>, expected: &FlowValue, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(FlowValue::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}
