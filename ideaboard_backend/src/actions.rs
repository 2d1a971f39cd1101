//! Proposed board mutations embedded in assistant replies.
//!
//! The model proposes changes by writing fenced blocks labelled `actions`:
//!
//! ````text
//! Sure, I'll add that.
//! ```actions
//! [{"type": "create_card", "params": {"text": "Onboarding", "columnId": "doing"}}]
//! ```
//! ````
//!
//! Parsing is fail-closed: if any block is malformed (bad JSON, unknown
//! action type, missing required field) the reply is shown verbatim with no
//! actions at all.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One typed board mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposedAction {
    CreateCard {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column_id: Option<String>,
    },
    MoveCard {
        card_id: String,
        column_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_column_id: Option<String>,
    },
    ModifyCard {
        card_id: String,
        text: String,
    },
}

impl ProposedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ProposedAction::CreateCard { .. } => "create_card",
            ProposedAction::MoveCard { .. } => "move_card",
            ProposedAction::ModifyCard { .. } => "modify_card",
        }
    }

    /// Short human-readable description for approval prompts.
    pub fn describe(&self) -> String {
        match self {
            ProposedAction::CreateCard { text, column_id } => format!(
                "Create card \"{}\" in {}",
                text,
                column_id.as_deref().unwrap_or("the default column")
            ),
            ProposedAction::MoveCard {
                card_id, column_id, ..
            } => format!("Move card {} to {}", card_id, column_id),
            ProposedAction::ModifyCard { card_id, text } => {
                format!("Change card {} to \"{}\"", card_id, text)
            }
        }
    }
}

/// A proposed action with a stable identity assigned at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub action: ProposedAction,
}

impl Proposal {
    pub fn new(action: ProposedAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub message: String,
    pub actions: Vec<Proposal>,
}

/// Wire shape written by the model: `{type, params}` with camelCase,
/// loosely-typed params.
#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionParseError {
    #[error("invalid JSON in actions block: {0}")]
    Json(String),
    #[error("unknown action type '{0}'")]
    UnknownType(String),
    #[error("{action} is missing required param '{param}'")]
    MissingParam {
        action: &'static str,
        param: &'static str,
    },
}

impl TryFrom<RawAction> for ProposedAction {
    type Error = ActionParseError;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let params = &raw.params;
        match raw.action_type.as_str() {
            "create_card" => Ok(ProposedAction::CreateCard {
                text: required(params, "create_card", "text")?,
                column_id: optional(params, "columnId"),
            }),
            "move_card" => Ok(ProposedAction::MoveCard {
                card_id: required(params, "move_card", "cardId")?,
                // Older prompts used `toColumnId`; accepted here only.
                column_id: optional(params, "columnId")
                    .or_else(|| optional(params, "toColumnId"))
                    .ok_or(ActionParseError::MissingParam {
                        action: "move_card",
                        param: "columnId",
                    })?,
                from_column_id: optional(params, "fromColumnId"),
            }),
            "modify_card" => Ok(ProposedAction::ModifyCard {
                card_id: required(params, "modify_card", "cardId")?,
                text: required(params, "modify_card", "text")?,
            }),
            other => Err(ActionParseError::UnknownType(other.to_string())),
        }
    }
}

fn optional(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required(
    params: &Map<String, Value>,
    action: &'static str,
    param: &'static str,
) -> Result<String, ActionParseError> {
    optional(params, param).ok_or(ActionParseError::MissingParam { action, param })
}

fn actions_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```actions[ \t]*\r?\n([\s\S]*?)```").expect("static actions pattern")
    })
}

/// Extract every actions block from `raw`, returning the display text with
/// the blocks removed. Any malformed block yields the original text and no
/// actions.
pub fn parse_reply(raw: &str) -> ParsedReply {
    match try_parse_reply(raw) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => ParsedReply {
            message: raw.to_string(),
            actions: Vec::new(),
        },
        Err(error) => {
            tracing::warn!("Ignoring actions in assistant reply: {}", error);
            ParsedReply {
                message: raw.to_string(),
                actions: Vec::new(),
            }
        }
    }
}

fn try_parse_reply(raw: &str) -> Result<Option<ParsedReply>, ActionParseError> {
    let regex = actions_block_regex();
    let mut actions = Vec::new();
    let mut found = false;

    for caps in regex.captures_iter(raw) {
        found = true;
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let value: Value = serde_json::from_str(body.trim())
            .map_err(|error| ActionParseError::Json(error.to_string()))?;

        let items = match value {
            Value::Array(items) => items,
            single => vec![single],
        };
        for item in items {
            let raw_action: RawAction = serde_json::from_value(item)
                .map_err(|error| ActionParseError::Json(error.to_string()))?;
            actions.push(Proposal::new(ProposedAction::try_from(raw_action)?));
        }
    }

    if !found {
        return Ok(None);
    }

    tracing::debug!("Parsed {} proposed action(s) from reply", actions.len());
    let message = regex.replace_all(raw, "").trim().to_string();
    Ok(Some(ParsedReply { message, actions }))
}
