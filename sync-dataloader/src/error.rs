//! Execution errors.
use std::fmt;

use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use thiserror::Error;

use crate::graphql;
use crate::graphql::Location;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// An application error raised while resolving a single field.
///
/// Resolvers, batch functions and failed deferred values produce these. The executor catches
/// them at the closest field or list item and turns them into located GraphQL errors, so
/// sibling fields keep resolving.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldError {
    /// The error message.
    pub message: String,

    /// Extensions copied to the located error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: Object::default(),
        }
    }

    pub fn with_extension(mut self, key: impl Into<ByteString>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl std::error::Error for FieldError {}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        FieldError::new(message)
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        FieldError::new(message)
    }
}

/// Error types for execution.
///
/// Everything except [`ExecutionError::Field`] is a contract violation: it is never caught at a
/// field boundary and aborts the whole execution.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum ExecutionError {
    /// invalid deferred value state: {reason}
    InvalidState {
        /// What was attempted.
        reason: String,
    },

    /// configuration error: {reason}
    Configuration {
        /// The reason the configuration is wrong.
        reason: String,
    },

    /// batch function broke its contract: {reason}
    BatchContract {
        /// What the batch function returned.
        reason: String,
    },

    /// deferred execution failed to complete
    IncompleteExecution,

    /// {0}
    Field(#[from] FieldError),
}

impl ExecutionError {
    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        ExecutionError::InvalidState {
            reason: reason.into(),
        }
    }

    pub(crate) fn no_active_scope() -> Self {
        ExecutionError::Configuration {
            reason: "no active batch scope".to_string(),
        }
    }

    /// Returns `true` for application errors that are isolated to a single field.
    pub fn is_field_error(&self) -> bool {
        matches!(self, ExecutionError::Field(_))
    }

    pub fn extension_code(&self) -> &'static str {
        match self {
            ExecutionError::InvalidState { .. } => "INVALID_STATE",
            ExecutionError::Configuration { .. } => "CONFIGURATION_ERROR",
            ExecutionError::BatchContract { .. } => "BATCH_CONTRACT_ERROR",
            ExecutionError::IncompleteExecution => "INCOMPLETE_EXECUTION",
            ExecutionError::Field(_) => "FIELD_ERROR",
        }
    }

    /// Convert the execution error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>, locations: Vec<Location>) -> graphql::Error {
        match self {
            ExecutionError::Field(error) => {
                graphql::Error::from_field_error(error.clone(), path, locations)
            }
            _ => graphql::Error::builder()
                .message(self.to_string())
                .locations(locations)
                .and_path(path)
                .extension("code", self.extension_code())
                .build(),
        }
    }
}

/// Error types for query parsing.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum SpecError {
    /// parsing error: {0}
    ParsingError(String),

    /// unsupported selection: {0}
    UnsupportedSelection(String),

    /// subscription operations are not supported
    SubscriptionNotSupported,

    /// unknown operation named '{0}'
    UnknownOperation(String),

    /// the document does not contain any operation
    NoOperation,

    /// operation name is required when the document contains several operations
    AmbiguousOperation,

    /// invalid type reference: {0}
    InvalidType(String),
}
