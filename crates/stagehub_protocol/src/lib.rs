#![forbid(unsafe_code)]

pub mod wire;

pub use wire::{
	ChatEntry, ControlMessage, DEFAULT_MAX_MESSAGE_SIZE, NormalizedEvent, OutboundMessage, WireError, decode_control,
	decode_message, encode_message, encode_message_default,
};

/// Protocol version constants.
pub mod version {
	/// Current presentation protocol major version.
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current presentation protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;

	/// Compact representation useful for logs/metrics.
	pub const PROTOCOL_VERSION_U32: u32 = (PROTOCOL_MAJOR << 16) | PROTOCOL_MINOR;
}
