use serde::Serialize;
use serde_json::Value;

/// Envelope printed by `--json`
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    pub data: Value,
    pub meta: ResponseMeta,
}

impl CommandResponse {
    pub fn ok(data: Value, meta: ResponseMeta, hints: Vec<Hint>) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: None,
            hints,
            data,
            meta,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: Some(message.into()),
            hints: Vec::new(),
            data: Value::Null,
            meta: ResponseMeta::default(),
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.status, CommandStatus::Error)
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Ok,
    Error,
}

#[derive(Debug, Serialize, Clone)]
pub struct Hint {
    #[serde(rename = "type")]
    pub kind: HintKind,
    pub text: String,
}

impl Hint {
    pub fn new(kind: HintKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    Info,
    Action,
    Warn,
}

#[derive(Debug, Serialize, Default)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn ok_response_omits_empty_fields() {
        let response = CommandResponse::ok(json!({"files": 2}), ResponseMeta::default(), vec![]);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"status": "ok", "data": {"files": 2}, "meta": {}})
        );
    }

    #[test]
    fn error_response_carries_message() {
        let response = CommandResponse::error("boom");
        assert!(response.is_error());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "boom");
    }

    #[test]
    fn hints_serialize_kind_as_type() {
        let hint = Hint::new(HintKind::Action, "run gitvec index");
        assert_eq!(
            serde_json::to_value(hint).unwrap(),
            json!({"type": "action", "text": "run gitvec index"})
        );
    }
}
