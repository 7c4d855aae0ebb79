//! Wire message types
//!
//! Request and response records carried in frame bodies, and the errors
//! raised while decoding them.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// RPC method, carried in the frame tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Method {
    Has = 1,
    Get = 2,
    MGet = 3,
    Set = 4,
    MExpire = 5,
    Ttl = 6,
    Delete = 7,
    Close = 8,
}

impl Method {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Method::Has),
            2 => Some(Method::Get),
            3 => Some(Method::MGet),
            4 => Some(Method::Set),
            5 => Some(Method::MExpire),
            6 => Some(Method::Ttl),
            7 => Some(Method::Delete),
            8 => Some(Method::Close),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::Has => "Has",
            Method::Get => "Get",
            Method::MGet => "MGet",
            Method::Set => "Set",
            Method::MExpire => "MExpire",
            Method::Ttl => "TTL",
            Method::Delete => "Delete",
            Method::Close => "Close",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body shared by the single-storage methods
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Data {
    pub storage: String,
    pub keys: Vec<String>,
    /// Only meaningful for MExpire
    pub timeout: String,
}

impl Data {
    pub fn new(storage: impl Into<String>, keys: &[&str]) -> Self {
        Data {
            storage: storage.into(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            timeout: String::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }
}

/// Item as it travels on the wire, TTL still unparsed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WireItem {
    pub key: String,
    pub value: Bytes,
    pub timeout: String,
}

impl WireItem {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, timeout: impl Into<String>) -> Self {
        WireItem {
            key: key.into(),
            value: value.into(),
            timeout: timeout.into(),
        }
    }
}

/// Body of a Set request: one batch, several target storages
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetData {
    pub items: Vec<WireItem>,
    pub storages: Vec<String>,
}

/// A decoded request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Has(Data),
    Get(Data),
    MGet(Data),
    Set(SetData),
    MExpire(Data),
    Ttl(Data),
    Delete(Data),
    Close(String),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Has(_) => Method::Has,
            Request::Get(_) => Method::Get,
            Request::MGet(_) => Method::MGet,
            Request::Set(_) => Method::Set,
            Request::MExpire(_) => Method::MExpire,
            Request::Ttl(_) => Method::Ttl,
            Request::Delete(_) => Method::Delete,
            Request::Close(_) => Method::Close,
        }
    }
}

/// A response body
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// key → exists, in request order
    Has(Vec<(String, bool)>),

    /// Value of the first key, `None` if absent
    Get(Option<Bytes>),

    /// Present keys and their values, in request order
    MGet(Vec<(String, Bytes)>),

    /// Remaining seconds per present key, `-1` = no expiry
    Ttl(Vec<(String, i64)>),

    /// Boolean success for Set, MExpire, Delete and Close
    Done(Method),

    /// Application or decode error
    Error { code: u8, message: String },
}

impl Response {
    pub fn error(code: u8, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

/// Errors raised while decoding a frame body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload truncated")]
    Truncated,

    #[error("unknown method tag {0:#04x}")]
    UnknownMethod(u8),

    #[error("unexpected response tag {0:#04x}")]
    UnexpectedTag(u8),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),

    #[error("checksum mismatch: expected {expected:#018x}, got {actual:#018x}")]
    Checksum { expected: u64, actual: u64 },

    #[error("{0} trailing bytes after body")]
    TrailingBytes(usize),
}
