//! Response definitions
//!
//! Replies sent by the server.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{FailureKind, StoreFailure};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
}

impl Status {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::NotFound),
            0x02 => Some(Status::Error),
            _ => None,
        }
    }
}

/// A reply to a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Handshake accepted
    Welcome { session: u64 },

    /// Result of GET (`None` when the document doesn't exist)
    Document(Option<Document>),

    /// Result of QUERY
    Documents(Vec<Document>),

    /// Result of COMMIT
    Committed { count: u64 },

    /// Result of PING
    Pong,

    /// The command failed on the server
    Failure(StoreFailure),
}

impl Response {
    /// Create an ERROR (or NOT_FOUND) response
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Response::Failure(StoreFailure::new(kind, message))
    }

    /// Status carried in the frame tag
    pub fn status(&self) -> Status {
        match self {
            Response::Failure(f) if f.kind == FailureKind::NotFound => Status::NotFound,
            Response::Failure(_) => Status::Error,
            _ => Status::Ok,
        }
    }
}
