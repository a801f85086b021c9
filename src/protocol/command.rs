//! Command definitions
//!
//! Requests sent by a `RemoteStore` to the server.

use serde::{Deserialize, Serialize};

use crate::batch::BatchOperation;
use crate::document::DocumentKey;
use crate::query::QuerySpec;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Hello = 0x01,
    Get = 0x02,
    Query = 0x03,
    Commit = 0x04,
    Ping = 0x05,
}

impl CommandType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(CommandType::Hello),
            0x02 => Some(CommandType::Get),
            0x03 => Some(CommandType::Query),
            0x04 => Some(CommandType::Commit),
            0x05 => Some(CommandType::Ping),
            _ => None,
        }
    }
}

/// A request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Authenticate the session
    Hello { project_id: String, token: String },

    /// Read one document
    Get { key: DocumentKey },

    /// Run a query
    Query { spec: QuerySpec },

    /// Apply a batch atomically
    Commit { operations: Vec<BatchOperation> },

    /// Ping (health check)
    Ping,
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Hello { .. } => CommandType::Hello,
            Command::Get { .. } => CommandType::Get,
            Command::Query { .. } => CommandType::Query,
            Command::Commit { .. } => CommandType::Commit,
            Command::Ping => CommandType::Ping,
        }
    }
}
