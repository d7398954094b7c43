//! Decision payload parsing
//!
//! The oracle and the reasoner both answer with a JSON object of the
//! shape `{"action": "allow" | "block" | "review"}`. Anything else is a
//! distinct parse failure, never silently coerced into a decision; the
//! pipeline decides how a parse failure escalates.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Verdict of a judgment tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Block,
    Review,
}

#[derive(Deserialize)]
struct ActionPayload {
    action: String,
}

impl Decision {
    /// Parse a decision from raw model output.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let payload: ActionPayload =
            serde_json::from_str(trimmed).map_err(|_| GatewayError::DecisionParse {
                text: text.to_string(),
            })?;
        match payload.action.as_str() {
            "allow" => Ok(Decision::Allow),
            "block" => Ok(Decision::Block),
            "review" => Ok(Decision::Review),
            _ => Err(GatewayError::DecisionParse {
                text: text.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Block => "block",
            Decision::Review => "review",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_action() {
        assert_eq!(
            Decision::parse(r#"{"action": "allow"}"#).unwrap(),
            Decision::Allow
        );
        assert_eq!(
            Decision::parse(r#"{"action": "block"}"#).unwrap(),
            Decision::Block
        );
        assert_eq!(
            Decision::parse(r#"{"action": "review"}"#).unwrap(),
            Decision::Review
        );
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        assert_eq!(
            Decision::parse("\n  {\"action\": \"block\"}  \n").unwrap(),
            Decision::Block
        );
    }

    #[test]
    fn test_parse_rejects_unknown_action() {
        let err = Decision::parse(r#"{"action": "maybe"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::DecisionParse { .. }));
    }

    #[test]
    fn test_parse_rejects_free_text() {
        let err = Decision::parse("I think this request looks fine").unwrap_err();
        assert!(matches!(err, GatewayError::DecisionParse { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let err = Decision::parse(r#"{"verdict": "allow"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::DecisionParse { .. }));
    }
}
