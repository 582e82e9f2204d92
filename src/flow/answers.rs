use once_cell::sync::Lazy;
use regex::Regex;

use crate::flow::nodes::{AnswerType, QuestionNode};
use crate::flow::value::FlowValue;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9\s\-().]{5,22}$").expect("valid phone pattern"));

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// 按问题声明的类型校验并转换用户输入；失败时返回原因
pub fn coerce_answer(question: &QuestionNode, input: Option<&str>) -> Result<FlowValue, String> {
    let raw = input.ok_or_else(|| "an answer is required".to_string())?;
    let trimmed = raw.trim();

    match question.expected_answer_type {
        AnswerType::Text => {
            if trimmed.is_empty() {
                Err("answer must not be blank".to_string())
            } else {
                Ok(FlowValue::String(trimmed.to_string()))
            }
        }
        AnswerType::Number => trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FlowValue::Number)
            .ok_or_else(|| format!("`{trimmed}` is not a number")),
        AnswerType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(FlowValue::Bool(true)),
            "false" | "no" => Ok(FlowValue::Bool(false)),
            _ => Err(format!("`{trimmed}` is not one of true/false/yes/no")),
        },
        AnswerType::Choice => {
            if question.choices.iter().any(|choice| choice == raw) {
                Ok(FlowValue::String(raw.to_string()))
            } else {
                Err(format!(
                    "`{raw}` is not one of: {}",
                    question.choices.join(", ")
                ))
            }
        }
        AnswerType::Email => {
            if EMAIL_PATTERN.is_match(trimmed) {
                Ok(FlowValue::String(trimmed.to_string()))
            } else {
                Err(format!("`{trimmed}` is not a valid email address"))
            }
        }
        AnswerType::Phone => {
            let digits = trimmed.chars().filter(char::is_ascii_digit).count();
            if PHONE_PATTERN.is_match(trimmed)
                && (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
            {
                Ok(FlowValue::String(trimmed.to_string()))
            } else {
                Err(format!("`{trimmed}` is not a valid phone number"))
            }
        }
    }
}
