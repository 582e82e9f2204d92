use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 会话变量表，按名称有序以保证快照稳定
pub type Variables = BTreeMap<String, FlowValue>;

/// 条件值、动作参数与会话变量共用的动态值
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlowValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<FlowValue>),
    Map(BTreeMap<String, FlowValue>),
}

impl FlowValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FlowValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlowValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlowValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FlowValue>> {
        match self {
            FlowValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FlowValue::Null => "null",
            FlowValue::Bool(_) => "boolean",
            FlowValue::Number(_) => "number",
            FlowValue::String(_) => "string",
            FlowValue::List(_) => "list",
            FlowValue::Map(_) => "map",
        }
    }

    /// 转换为 serde_json::Value，整数值保持整数形式
    pub fn to_json(&self) -> Value {
        match self {
            FlowValue::Null => Value::Null,
            FlowValue::Bool(b) => Value::Bool(*b),
            FlowValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            FlowValue::String(s) => Value::String(s.clone()),
            FlowValue::List(items) => Value::Array(items.iter().map(FlowValue::to_json).collect()),
            FlowValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for FlowValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FlowValue::Null,
            Value::Bool(b) => FlowValue::Bool(b),
            Value::Number(n) => n.as_f64().map(FlowValue::Number).unwrap_or(FlowValue::Null),
            Value::String(s) => FlowValue::String(s),
            Value::Array(items) => FlowValue::List(items.into_iter().map(FlowValue::from).collect()),
            Value::Object(map) => FlowValue::Map(
                map.into_iter()
                    .map(|(key, value)| (key, FlowValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FlowValue {
    fn from(value: &str) -> Self {
        FlowValue::String(value.to_string())
    }
}

impl From<String> for FlowValue {
    fn from(value: String) -> Self {
        FlowValue::String(value)
    }
}

impl From<f64> for FlowValue {
    fn from(value: f64) -> Self {
        FlowValue::Number(value)
    }
}

impl From<i64> for FlowValue {
    fn from(value: i64) -> Self {
        FlowValue::Number(value as f64)
    }
}

impl From<bool> for FlowValue {
    fn from(value: bool) -> Self {
        FlowValue::Bool(value)
    }
}

impl fmt::Display for FlowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowValue::Null => Ok(()),
            FlowValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// 将 `{{name}}` 占位符替换为变量值，未知变量替换为空串
pub fn interpolate(template: &str, variables: &Variables) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                if let Some(value) = variables.get(name) {
                    output.push_str(&value.to_string());
                }
                rest = &after[end + 2..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untagged_serde_matches_plain_json() {
        let value: FlowValue = serde_json::from_value(json!({"a": [1, "x", null, true]})).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert(
            "a".to_string(),
            FlowValue::List(vec![
                FlowValue::Number(1.0),
                FlowValue::String("x".into()),
                FlowValue::Null,
                FlowValue::Bool(true),
            ]),
        );
        assert_eq!(value, FlowValue::Map(expected));
        assert_eq!(value.to_json(), json!({"a": [1, "x", null, true]}));
    }

    #[test]
    fn interpolate_replaces_known_variables() {
        let mut vars = Variables::new();
        vars.insert("name".into(), "Ada".into());
        vars.insert("age".into(), FlowValue::Number(36.0));
        assert_eq!(
            interpolate("Hi {{ name }}, you are {{age}}{{missing}}!", &vars),
            "Hi Ada, you are 36!"
        );
        assert_eq!(interpolate("open {{ brace", &vars), "open {{ brace");
    }
}
