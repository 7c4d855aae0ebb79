//! Binary RPC protocol
//!
//! Frames, request/response records and their encoding. This module knows
//! nothing about storages (loose coupling).

mod frame;
mod types;
mod wire;

pub use frame::{checksum, Frame, FrameCodec, DEFAULT_MAX_FRAME, ERROR_TAG, RESPONSE_FLAG};
pub use types::{Data, DecodeError, Method, Request, Response, SetData, WireItem};
