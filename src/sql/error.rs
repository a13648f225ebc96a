use thiserror::Error;

use super::timestamp::TimestampError;

/// Validation failures raised while turning a JSON document into SQL.
///
/// Every variant is produced before any SQL text leaves the compiler, so a
/// failing document never results in a partially executed statement.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to parse JSON payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("the \"{context}\" object is missing a \"{property}\" property")]
    MissingProperty {
        context: &'static str,
        property: &'static str,
    },

    #[error("the \"{property}\" property must be {expected}")]
    WrongType {
        property: &'static str,
        expected: &'static str,
    },

    #[error("the \"value\" of a \"{condition}\" condition must be an array and must not be empty")]
    EmptyArray { condition: String },

    #[error(
        "the \"value\" of a \"{condition}\" condition array element must be a string, integer or double"
    )]
    InvalidOperand { condition: String },

    #[error("{modifier} must be specified as a non-negative integer")]
    InvalidModifier { modifier: &'static str },

    #[error("{first} and {second} modifiers can not be used in the same payload")]
    ConflictingModifiers {
        first: &'static str,
        second: &'static str,
    },

    #[error("the {modifier} modifier can only be used together with {requires}")]
    DependentModifier {
        modifier: &'static str,
        requires: &'static str,
    },

    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

impl CompileError {
    pub(crate) fn missing(context: &'static str, property: &'static str) -> Self {
        CompileError::MissingProperty { context, property }
    }

    pub(crate) fn wrong_type(property: &'static str, expected: &'static str) -> Self {
        CompileError::WrongType { property, expected }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
