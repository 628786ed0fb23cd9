//! Terrastore Transport Layer
//!
//! Length-prefixed binary framing over persistent TCP connections.
//!
//! # Wire Format
//!
//! ```text
//! frame    = [4-byte length as u32 big-endian] + [payload]
//! request  = [8-byte request id] [2-byte kind] [2-byte version] [JSON body]
//! response = [8-byte request id] [1-byte status] [JSON body]
//! ```
//!
//! All numeric fields are big-endian. Frames are bounded at 100 MB to keep a
//! misbehaving peer from forcing huge allocations.
//!
//! # Components
//!
//! - **[`codec`]**: envelope encoding/decoding shared by client and server
//! - **[`tcp`]**: async connect plus frame read/write primitives

pub mod codec;
pub mod tcp;

pub use tcp::{connect, read_frame, write_frame, MAX_FRAME_SIZE};
