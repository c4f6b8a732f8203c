//! This crate implements the binary wire protocol spoken between a debuggee
//! running the `pyhook` debugger and the controller (usually an IDE) driving
//! it.
//!
//! Every frame starts with a four-byte command tag, followed by a payload
//! whose layout is fixed per tag:
//!
//! - integers are signed 32-bit little-endian values,
//! - outbound strings are a one-byte type tag (`A` for ASCII, `U` for UTF-8,
//!   `N` for none), then (unless `N`) a 32-bit length and the bytes,
//! - inbound strings are a 32-bit length followed by UTF-8 bytes,
//! - objects are three outbound strings (repr, hexadecimal repr, type name)
//!   followed by a 32-bit expandability flag.
//!
//! Inbound frames are parsed into [Request]s, outbound frames are built from
//! [Event]s. A [Channel] serializes outbound frames so that concurrent
//! writers never interleave partial frames.

mod channel;
mod error;
mod event;
mod request;
mod tag;

pub use self::channel::{Channel, MemoryTransport, Transport};
pub use self::error::{Error, Result};
pub use self::event::{Event, FrameInfo, WireObject, read_tagged_string, write_tagged_string};
pub use self::request::{CATCH_ALL, HandlerRegion, Request, read_i32, read_string};
pub use self::tag::{InboundTag, OutboundTag};
