//! Type coercion lattice (§4.G). Coerces a `DataValue` to the `DataType`
//! a task demands before dispatch. A coercion failure surfaces as a task
//! error routed through `transition.onFailure` if set, else terminates
//! the chain (handled by the caller in `engine.rs`).

use super::types::{DataType, DataValue};
use crate::chat::{ChatMessage, ChatRole};
use crate::error::CoreError;
use crate::types::{openai_to_history, OpenAiChatRequest};

/// coerce(x, T): table entries are `string ↔ int/float/bool` via parse,
/// `openai_chat → chat_history` by flattening messages, any → `any` is
/// identity, `any → X` attempts a JSON round-trip. Idempotent: coercing
/// an already-`T` value to `T` returns it unchanged (universal invariant 6).
pub fn coerce(value: &DataValue, target: DataType) -> Result<DataValue, CoreError> {
    if value.data_type() == target {
        return Ok(value.clone());
    }

    match (value, target) {
        (_, DataType::Any) => Ok(DataValue::Any(to_json(value)?)),
        (DataValue::Any(json), target) => from_json_as(json.clone(), target),

        (DataValue::String(s), DataType::Int) => s
            .trim()
            .parse::<i64>()
            .map(DataValue::Int)
            .map_err(|e| coercion_error(value, target, &e)),
        (DataValue::String(s), DataType::Float) => s
            .trim()
            .parse::<f64>()
            .map(DataValue::Float)
            .map_err(|e| coercion_error(value, target, &e)),
        (DataValue::String(s), DataType::Bool) => s
            .trim()
            .to_lowercase()
            .parse::<bool>()
            .map(DataValue::Bool)
            .map_err(|e| coercion_error(value, target, &e)),

        (DataValue::Int(i), DataType::String) => Ok(DataValue::String(i.to_string())),
        (DataValue::Float(f), DataType::String) => Ok(DataValue::String(f.to_string())),
        (DataValue::Bool(b), DataType::String) => Ok(DataValue::String(b.to_string())),

        (DataValue::OpenaiChat(req), DataType::ChatHistory) => {
            Ok(DataValue::ChatHistory(openai_to_history(req)))
        }
        (DataValue::String(s), DataType::ChatHistory) => {
            Ok(DataValue::ChatHistory(vec![ChatMessage::user(s.clone())]))
        }
        (DataValue::ChatHistory(history), DataType::OpenaiChat) => {
            Ok(DataValue::OpenaiChat(OpenAiChatRequest {
                model: String::new(),
                messages: history
                    .iter()
                    .map(|m| crate::types::OpenAiMessage {
                        role: match m.role {
                            ChatRole::System => "system",
                            ChatRole::User => "user",
                            ChatRole::Assistant => "assistant",
                        }
                        .to_string(),
                        content: m.content.clone(),
                    })
                    .collect(),
            }))
        }

        (DataValue::Json(json), target) => from_json_as(json.clone(), target),

        _ => Err(coercion_error(
            value,
            target,
            &format!("no coercion rule from {:?} to {:?}", value.data_type(), target),
        )),
    }
}

/// Unwraps a `DataValue` to its bare JSON representation (not the tagged
/// `{data_type, value}` envelope `DataValue`'s own `Serialize` impl
/// produces — `any` coercion wants the raw value).
fn to_json(value: &DataValue) -> Result<serde_json::Value, CoreError> {
    Ok(match value {
        DataValue::String(s) => serde_json::Value::String(s.clone()),
        DataValue::Int(i) => serde_json::json!(i),
        DataValue::Float(f) => serde_json::json!(f),
        DataValue::Bool(b) => serde_json::Value::Bool(*b),
        DataValue::Json(v) | DataValue::Any(v) => v.clone(),
        DataValue::ChatHistory(h) => serde_json::to_value(h)?,
        DataValue::OpenaiChat(r) => serde_json::to_value(r)?,
        DataValue::OpenaiChatResponse(r) => serde_json::to_value(r)?,
        DataValue::SearchResults(r) => serde_json::to_value(r)?,
    })
}

/// `any → X`: attempt JSON round-trip. §9 open question: structurally
/// lossy coercions should be reported as errors, not silently truncated —
/// so this rejects extra/mismatched fields via `serde_json`'s strict
/// struct deserialization rather than manually picking fields out.
fn from_json_as(json: serde_json::Value, target: DataType) -> Result<DataValue, CoreError> {
    let result = match target {
        DataType::String => json
            .as_str()
            .map(|s| DataValue::String(s.to_string()))
            .ok_or_else(|| json_mismatch(&json, target)),
        DataType::Int => json
            .as_i64()
            .map(DataValue::Int)
            .ok_or_else(|| json_mismatch(&json, target)),
        DataType::Float => json
            .as_f64()
            .map(DataValue::Float)
            .ok_or_else(|| json_mismatch(&json, target)),
        DataType::Bool => json
            .as_bool()
            .map(DataValue::Bool)
            .ok_or_else(|| json_mismatch(&json, target)),
        DataType::Json => Ok(DataValue::Json(json)),
        DataType::ChatHistory => serde_json::from_value(json.clone())
            .map(DataValue::ChatHistory)
            .map_err(|_| json_mismatch(&json, target)),
        DataType::OpenaiChat => serde_json::from_value(json.clone())
            .map(DataValue::OpenaiChat)
            .map_err(|_| json_mismatch(&json, target)),
        DataType::OpenaiChatResponse => serde_json::from_value(json.clone())
            .map(DataValue::OpenaiChatResponse)
            .map_err(|_| json_mismatch(&json, target)),
        DataType::SearchResults => serde_json::from_value(json.clone())
            .map(DataValue::SearchResults)
            .map_err(|_| json_mismatch(&json, target)),
        DataType::Any => Ok(DataValue::Any(json)),
    };
    result
}

fn json_mismatch(json: &serde_json::Value, target: DataType) -> CoreError {
    CoreError::Chain {
        message: format!("json value {json} does not round-trip into {target:?}"),
        partial_trace: vec![],
    }
}

fn coercion_error(value: &DataValue, target: DataType, detail: &impl std::fmt::Display) -> CoreError {
    CoreError::Chain {
        message: format!(
            "cannot coerce {:?} to {:?}: {detail}",
            value.data_type(),
            target
        ),
        partial_trace: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_is_idempotent_for_scalars() {
        let v = DataValue::Int(42);
        let once = coerce(&v, DataType::Int).unwrap();
        let twice = coerce(&once, DataType::Int).unwrap();
        assert!(matches!(twice, DataValue::Int(42)));
    }

    #[test]
    fn string_to_int_parses() {
        let v = DataValue::String("123".to_string());
        let coerced = coerce(&v, DataType::Int).unwrap();
        assert!(matches!(coerced, DataValue::Int(123)));
    }

    #[test]
    fn string_to_int_failure_is_a_chain_error() {
        let v = DataValue::String("not-a-number".to_string());
        let err = coerce(&v, DataType::Int).unwrap_err();
        assert!(matches!(err, CoreError::Chain { .. }));
    }

    #[test]
    fn openai_chat_to_chat_history_flattens_messages() {
        let req = OpenAiChatRequest {
            model: "m".into(),
            messages: vec![crate::types::OpenAiMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
        };
        let coerced = coerce(&DataValue::OpenaiChat(req), DataType::ChatHistory).unwrap();
        match coerced {
            DataValue::ChatHistory(history) => {
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].content, "hi");
            }
            _ => panic!("expected chat history"),
        }
    }

    #[test]
    fn any_to_x_is_identity_then_round_trip() {
        let v = DataValue::String("hello".to_string());
        let any = coerce(&v, DataType::Any).unwrap();
        assert!(matches!(any, DataValue::Any(_)));
        let back = coerce(&any, DataType::String).unwrap();
        assert!(matches!(back, DataValue::String(s) if s == "hello"));
    }
}
