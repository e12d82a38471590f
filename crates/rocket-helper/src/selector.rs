//! Subscription selectors and tag expression matching.
//!
//! A tag expression is either `*` (or empty), matching every message, or a
//! list of tags joined by `||`, e.g. `created || paid`. Untagged messages only
//! match the wildcard.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;

/// Wildcard expression subscribing to all tags
pub const SUBSCRIBE_ALL: &str = "*";

/// Kind of filter expression attached to a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpressionType {
    Tag,
    Sql92,
}

/// Server-side filter for a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSelector {
    pub expression_type: ExpressionType,
    pub expression: String,
}

impl MessageSelector {
    /// Tag selector for the given expression
    pub fn tag(expression: impl Into<String>) -> Self {
        Self {
            expression_type: ExpressionType::Tag,
            expression: expression.into(),
        }
    }

    /// SQL92 property selector
    pub fn sql92(expression: impl Into<String>) -> Self {
        Self {
            expression_type: ExpressionType::Sql92,
            expression: expression.into(),
        }
    }

    /// Selector matching every message of the topic
    pub fn all() -> Self {
        Self::tag(SUBSCRIBE_ALL)
    }
}

impl Default for MessageSelector {
    fn default() -> Self {
        Self::all()
    }
}

/// Parsed tag expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    All,
    AnyOf(BTreeSet<String>),
}

impl TagFilter {
    /// Parse a tag expression
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        let expression = expression.trim();
        if expression.is_empty() || expression == SUBSCRIBE_ALL {
            return Ok(Self::All);
        }

        let mut tags = BTreeSet::new();
        for tag in expression.split("||").map(str::trim) {
            if tag.is_empty() {
                return Err(ValidationError::InvalidFormat {
                    field: "tag_expression".to_string(),
                    message: format!("empty tag in '{}'", expression),
                });
            }
            if tag == SUBSCRIBE_ALL {
                return Ok(Self::All);
            }
            tags.insert(tag.to_string());
        }

        Ok(Self::AnyOf(tags))
    }

    /// Build the filter for a selector; only tag selectors are supported
    pub fn from_selector(selector: &MessageSelector) -> Result<Self, ValidationError> {
        match selector.expression_type {
            ExpressionType::Tag => Self::parse(&selector.expression),
            ExpressionType::Sql92 => Err(ValidationError::Unsupported {
                field: "expression_type".to_string(),
                message: "SQL92 filtering is not supported".to_string(),
            }),
        }
    }

    /// Check whether a message tag passes the filter
    pub fn matches(&self, tag: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::AnyOf(tags) => tag.is_some_and(|tag| tags.contains(tag)),
        }
    }
}
