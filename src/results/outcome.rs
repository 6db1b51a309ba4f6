use crate::requester::RequestError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why a single request failed. Stored as data, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    EmptyResponse,
    RemoteError { status: u16 },
    Unclassified { message: String },
}

impl FailureKind {
    pub fn status(&self) -> Option<u16> {
        match self {
            FailureKind::RemoteError { status } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::EmptyResponse => write!(f, "the response was returned empty"),
            FailureKind::RemoteError { status } => write!(f, "failed with code {}", status),
            FailureKind::Unclassified { message } => write!(f, "exception raised: {}", message),
        }
    }
}

impl From<RequestError> for FailureKind {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Empty => FailureKind::EmptyResponse,
            RequestError::Http { status, .. } => FailureKind::RemoteError { status },
            RequestError::Other(message) => FailureKind::Unclassified { message },
        }
    }
}

/// Classified result of one collaborator invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl From<Result<Value, RequestError>> for Outcome {
    fn from(r: Result<Value, RequestError>) -> Self {
        match r {
            Ok(v) => Outcome::Success(v),
            Err(e) => Outcome::Failure(e.into()),
        }
    }
}
