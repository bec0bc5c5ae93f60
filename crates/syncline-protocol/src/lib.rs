//! # syncline-protocol
//!
//! Wire types shared by the Syncline request pipeline, realtime dispatcher and
//! connection health monitor.
//!
//! This crate defines what travels over the wire and nothing else:
//!
//! - `RealtimeMessage` / `MessageType` - Events pushed by the realtime channel
//! - `codec` - JSON framing for realtime messages
//! - `ConnectionStatus` / `ConnectionCode` - Connectivity notifications
//! - `headers` / `alerts` - Server-declared signals carried on HTTP responses
//!
//! ## Example
//!
//! ```rust
//! use syncline_protocol::{codec, MessageType};
//!
//! let message = codec::decode(r#"{"type":"echo"}"#).unwrap();
//! assert_eq!(message.message_type, MessageType::Echo);
//! assert!(!message.block_until_processed);
//! ```

pub mod codec;
pub mod message;
pub mod status;

pub use codec::{decode, encode, ProtocolError};
pub use message::{is_empty_payload, MessageType, RealtimeMessage};
pub use status::{alerts, header_flag, headers, ConnectionCode, ConnectionStatus};
