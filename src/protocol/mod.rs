//! Protocol Module
//!
//! Defines the wire protocol between `RemoteStore` and the docbridge server.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────────────────┐
//! │ Tag (1)  │ Len (4)  │ CRC (4)  │    Payload (bincode)        │
//! └──────────┴──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Request Tags
//! - 0x01: HELLO  - project id + access token, must come first
//! - 0x02: GET    - document key
//! - 0x03: QUERY  - query spec
//! - 0x04: COMMIT - ordered batch operations
//! - 0x05: PING   - empty
//!
//! ### Response Tags (status)
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR

mod command;
mod response;
mod codec;

pub use command::{Command, CommandType};
pub use response::{Response, Status};
pub use codec::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
