//! Body encoding and decoding
//!
//! Primitives (all integers little-endian):
//! - str   = [len: u32][utf-8 bytes]
//! - bytes = [len: u32][bytes]
//! - list  = [count: u32][elements...]
//! - bool  = [u8: 0 | 1]

use super::frame::{Frame, ERROR_TAG, RESPONSE_FLAG};
use super::types::{Data, DecodeError, Method, Request, Response, SetData, WireItem};
use bytes::{Buf, BufMut, Bytes, BytesMut};

type DecodeResult<T> = Result<T, DecodeError>;

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

fn put_str(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn put_list<T>(buf: &mut BytesMut, items: &[T], mut f: impl FnMut(&mut BytesMut, &T)) {
    buf.put_u32_le(items.len() as u32);
    for item in items {
        f(buf, item);
    }
}

fn get_u8(buf: &mut Bytes) -> DecodeResult<u8> {
    if buf.remaining() < 1 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut Bytes) -> DecodeResult<u32> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u32_le())
}

fn get_i64(buf: &mut Bytes) -> DecodeResult<i64> {
    if buf.remaining() < 8 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_i64_le())
}

fn get_bool(buf: &mut Bytes) -> DecodeResult<bool> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::InvalidBool(other)),
    }
}

fn get_bytes(buf: &mut Bytes) -> DecodeResult<Bytes> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.split_to(len))
}

fn get_str(buf: &mut Bytes) -> DecodeResult<String> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

fn get_list<T>(
    buf: &mut Bytes,
    mut f: impl FnMut(&mut Bytes) -> DecodeResult<T>,
) -> DecodeResult<Vec<T>> {
    let count = get_u32(buf)? as usize;
    // Every element takes at least one byte, so never trust the count for
    // the allocation size.
    let mut items = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        items.push(f(buf)?);
    }
    Ok(items)
}

fn finish<T>(buf: &Bytes, value: T) -> DecodeResult<T> {
    if buf.has_remaining() {
        return Err(DecodeError::TrailingBytes(buf.remaining()));
    }
    Ok(value)
}

fn encode_data(buf: &mut BytesMut, data: &Data) {
    put_str(buf, &data.storage);
    put_list(buf, &data.keys, |b, k| put_str(b, k));
    put_str(buf, &data.timeout);
}

fn decode_data(buf: &mut Bytes) -> DecodeResult<Data> {
    Ok(Data {
        storage: get_str(buf)?,
        keys: get_list(buf, get_str)?,
        timeout: get_str(buf)?,
    })
}

fn encode_set(buf: &mut BytesMut, data: &SetData) {
    put_list(buf, &data.items, |b, item| {
        put_str(b, &item.key);
        put_bytes(b, &item.value);
        put_str(b, &item.timeout);
    });
    put_list(buf, &data.storages, |b, s| put_str(b, s));
}

fn decode_set(buf: &mut Bytes) -> DecodeResult<SetData> {
    let items = get_list(buf, |b| {
        Ok(WireItem {
            key: get_str(b)?,
            value: get_bytes(b)?,
            timeout: get_str(b)?,
        })
    })?;
    let storages = get_list(buf, get_str)?;
    Ok(SetData { items, storages })
}

impl Request {
    /// Encode into a request frame
    pub fn encode(&self, seq: u64) -> Frame {
        let mut buf = BytesMut::new();
        match self {
            Request::Has(d)
            | Request::Get(d)
            | Request::MGet(d)
            | Request::MExpire(d)
            | Request::Ttl(d)
            | Request::Delete(d) => encode_data(&mut buf, d),
            Request::Set(d) => encode_set(&mut buf, d),
            Request::Close(storage) => put_str(&mut buf, storage),
        }
        Frame::new(self.method() as u8, seq, buf.freeze())
    }

    /// Decode a request frame, checksum included
    pub fn decode(frame: &Frame) -> DecodeResult<Self> {
        frame.verify()?;

        let method = Method::from_u8(frame.tag).ok_or(DecodeError::UnknownMethod(frame.tag))?;
        let mut buf = frame.body.clone();

        let request = match method {
            Method::Has => Request::Has(decode_data(&mut buf)?),
            Method::Get => Request::Get(decode_data(&mut buf)?),
            Method::MGet => Request::MGet(decode_data(&mut buf)?),
            Method::Set => Request::Set(decode_set(&mut buf)?),
            Method::MExpire => Request::MExpire(decode_data(&mut buf)?),
            Method::Ttl => Request::Ttl(decode_data(&mut buf)?),
            Method::Delete => Request::Delete(decode_data(&mut buf)?),
            Method::Close => Request::Close(get_str(&mut buf)?),
        };

        finish(&buf, request)
    }
}

impl Response {
    /// Encode into a response frame answering `method`
    pub fn encode(&self, method: Method, seq: u64) -> Frame {
        let mut buf = BytesMut::new();
        let tag = match self {
            Response::Has(pairs) => {
                put_list(&mut buf, pairs, |b, (k, v)| {
                    put_str(b, k);
                    b.put_u8(*v as u8);
                });
                RESPONSE_FLAG | method as u8
            }
            Response::Get(value) => {
                buf.put_u8(value.is_some() as u8);
                put_bytes(&mut buf, value.as_deref().unwrap_or_default());
                RESPONSE_FLAG | method as u8
            }
            Response::MGet(pairs) => {
                put_list(&mut buf, pairs, |b, (k, v)| {
                    put_str(b, k);
                    put_bytes(b, v);
                });
                RESPONSE_FLAG | method as u8
            }
            Response::Ttl(pairs) => {
                put_list(&mut buf, pairs, |b, (k, secs)| {
                    put_str(b, k);
                    b.put_i64_le(*secs);
                });
                RESPONSE_FLAG | method as u8
            }
            Response::Done(_) => {
                buf.put_u8(1);
                RESPONSE_FLAG | method as u8
            }
            Response::Error { code, message } => {
                buf.put_u8(*code);
                put_str(&mut buf, message);
                ERROR_TAG
            }
        };
        Frame::new(tag, seq, buf.freeze())
    }

    /// Decode a response frame, checksum included
    pub fn decode(frame: &Frame) -> DecodeResult<Self> {
        frame.verify()?;
        let mut buf = frame.body.clone();

        if frame.tag == ERROR_TAG {
            let code = get_u8(&mut buf)?;
            let message = get_str(&mut buf)?;
            return finish(&buf, Response::Error { code, message });
        }

        if frame.tag & RESPONSE_FLAG == 0 {
            return Err(DecodeError::UnexpectedTag(frame.tag));
        }
        let method = Method::from_u8(frame.tag & !RESPONSE_FLAG)
            .ok_or(DecodeError::UnexpectedTag(frame.tag))?;

        let response = match method {
            Method::Has => Response::Has(get_list(&mut buf, |b| Ok((get_str(b)?, get_bool(b)?)))?),
            Method::Get => {
                let present = get_bool(&mut buf)?;
                let value = get_bytes(&mut buf)?;
                Response::Get(present.then_some(value))
            }
            Method::MGet => {
                Response::MGet(get_list(&mut buf, |b| Ok((get_str(b)?, get_bytes(b)?)))?)
            }
            Method::Ttl => Response::Ttl(get_list(&mut buf, |b| Ok((get_str(b)?, get_i64(b)?)))?),
            Method::Set | Method::MExpire | Method::Delete | Method::Close => {
                get_bool(&mut buf)?;
                Response::Done(method)
            }
        };

        finish(&buf, response)
    }
}
