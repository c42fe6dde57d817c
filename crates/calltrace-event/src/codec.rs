//! Length-delimited binary log codec.
//!
//! The on-disk log is a flat sequence of records. Each record is a `u32`
//! little-endian payload length followed by the payload:
//!
//! ```text
//! payload  := time_ms:i64 LE, thread_id:i64 LE, variant:u8, body
//! enter    := str class, str method, is_static:u8, params:u8,
//!             [count:u32 LE, value...]        (params = 1)
//! exit     := has_return:u8, [value]          (has_return = 1)
//! exception:= value
//! value    := kind:u8, payload (native width, LE; floats as IEEE-754 bits;
//!             char as u32 scalar; object as str type_name, str text)
//! str      := len:u32 LE, UTF-8 bytes
//! ```
//!
//! The explicit kind tag per value is what keeps distinct bit widths apart
//! across the wire; decoding restores the exact kind that was boxed.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::event::Event;
use crate::value::Value;

/// Upper bound on a single record or string, to keep a corrupt length
/// prefix from triggering an absurd allocation.
const MAX_LEN: u32 = 16 * 1024 * 1024;

const VARIANT_ENTER: u8 = 0;
const VARIANT_EXIT: u8 = 1;
const VARIANT_EXCEPTION: u8 = 2;

const KIND_BOOL: u8 = 0;
const KIND_CHAR: u8 = 1;
const KIND_I8: u8 = 2;
const KIND_I16: u8 = 3;
const KIND_I32: u8 = 4;
const KIND_I64: u8 = 5;
const KIND_F32: u8 = 6;
const KIND_F64: u8 = 7;
const KIND_OBJECT: u8 = 8;

/// Errors produced while encoding or decoding log records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A variant or kind tag was not recognized.
    #[error("Invalid {what} tag: {tag}")]
    InvalidTag {
        /// Which tag field was malformed.
        what: &'static str,
        /// The value read.
        tag: u8,
    },

    /// A char payload was not a Unicode scalar value.
    #[error("Invalid char scalar: {0:#x}")]
    InvalidChar(u32),

    /// A string payload was not valid UTF-8.
    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length prefix exceeded the sanity bound.
    #[error("Length prefix {len} exceeds limit {limit}")]
    OversizedLength {
        /// The length read.
        len: u32,
        /// The allowed maximum.
        limit: u32,
    },

    /// A record payload ended before its declared length.
    #[error("Truncated record")]
    Truncated,
}

/// Result type for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Encode one event into its record payload (without the length prefix).
pub fn encode_event(event: &Event, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&event.time_ms().to_le_bytes());
    buf.extend_from_slice(&event.thread_id().to_le_bytes());
    match event {
        Event::Enter {
            class_name,
            method_name,
            is_static,
            parameters,
            ..
        } => {
            buf.push(VARIANT_ENTER);
            put_str(buf, class_name);
            put_str(buf, method_name);
            buf.push(u8::from(*is_static));
            match parameters {
                Some(values) => {
                    buf.push(1);
                    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
                    for value in values {
                        put_value(buf, value);
                    }
                }
                None => buf.push(0),
            }
        }
        Event::Exit { return_value, .. } => {
            buf.push(VARIANT_EXIT);
            match return_value {
                Some(value) => {
                    buf.push(1);
                    put_value(buf, value);
                }
                None => buf.push(0),
            }
        }
        Event::Exception { thrown, .. } => {
            buf.push(VARIANT_EXCEPTION);
            put_value(buf, thrown);
        }
    }
}

/// Write one length-delimited record.
pub fn write_event<W: Write>(writer: &mut W, event: &Event) -> CodecResult<()> {
    let mut payload = Vec::with_capacity(64);
    encode_event(event, &mut payload);
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read one length-delimited record. Returns `Ok(None)` on a clean
/// end-of-stream (no bytes before the next length prefix).
pub fn read_event<R: Read>(reader: &mut R) -> CodecResult<Option<Event>> {
    let mut prefix = [0u8; 4];
    if !read_prefix(reader, &mut prefix)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(prefix);
    if len > MAX_LEN {
        return Err(CodecError::OversizedLength {
            len,
            limit: MAX_LEN,
        });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(truncated)?;
    decode_event(&payload).map(Some)
}

/// Decode a record payload (without the length prefix).
pub fn decode_event(payload: &[u8]) -> CodecResult<Event> {
    let mut cursor = Cursor { data: payload };
    let time_ms = cursor.take_i64()?;
    let thread_id = cursor.take_i64()?;
    let event = match cursor.take_u8()? {
        VARIANT_ENTER => {
            let class_name = cursor.take_str()?;
            let method_name = cursor.take_str()?;
            let is_static = cursor.take_u8()? != 0;
            let parameters = match cursor.take_u8()? {
                0 => None,
                _ => {
                    let count = cursor.take_u32()?;
                    if count > MAX_LEN {
                        return Err(CodecError::OversizedLength {
                            len: count,
                            limit: MAX_LEN,
                        });
                    }
                    let mut values = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        values.push(cursor.take_value()?);
                    }
                    Some(values)
                }
            };
            Event::Enter {
                thread_id,
                time_ms,
                class_name,
                method_name,
                is_static,
                parameters,
            }
        }
        VARIANT_EXIT => {
            let return_value = match cursor.take_u8()? {
                0 => None,
                _ => Some(cursor.take_value()?),
            };
            Event::Exit {
                thread_id,
                time_ms,
                return_value,
            }
        }
        VARIANT_EXCEPTION => Event::Exception {
            thread_id,
            time_ms,
            thrown: cursor.take_value()?,
        },
        tag => {
            return Err(CodecError::InvalidTag {
                what: "variant",
                tag,
            });
        }
    };
    Ok(event)
}

/// Decode every record in a stream, in file order.
pub fn read_all<R: Read>(reader: &mut R) -> CodecResult<Vec<Event>> {
    let mut events = Vec::new();
    while let Some(event) = read_event(reader)? {
        events.push(event);
    }
    Ok(events)
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Bool(v) => {
            buf.push(KIND_BOOL);
            buf.push(u8::from(*v));
        }
        Value::Char(v) => {
            buf.push(KIND_CHAR);
            buf.extend_from_slice(&(*v as u32).to_le_bytes());
        }
        Value::I8(v) => {
            buf.push(KIND_I8);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::I16(v) => {
            buf.push(KIND_I16);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::I32(v) => {
            buf.push(KIND_I32);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::I64(v) => {
            buf.push(KIND_I64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::F32(v) => {
            buf.push(KIND_F32);
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::F64(v) => {
            buf.push(KIND_F64);
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::Object { type_name, text } => {
            buf.push(KIND_OBJECT);
            put_str(buf, type_name);
            put_str(buf, text);
        }
    }
}

/// Read the 4-byte length prefix; `false` means a clean end-of-stream.
fn read_prefix<R: Read>(reader: &mut R, prefix: &mut [u8; 4]) -> CodecResult<bool> {
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..])? {
            0 if filled == 0 => return Ok(false),
            0 => return Err(CodecError::Truncated),
            n => filled += n,
        }
    }
    Ok(true)
}

fn truncated(err: io::Error) -> CodecError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::Truncated
    } else {
        CodecError::Io(err)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.data.len() < n {
            return Err(CodecError::Truncated);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn take_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> CodecResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_i64(&mut self) -> CodecResult<i64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    fn take_str(&mut self) -> CodecResult<String> {
        let len = self.take_u32()?;
        if len > MAX_LEN {
            return Err(CodecError::OversizedLength {
                len,
                limit: MAX_LEN,
            });
        }
        let bytes = self.take(len as usize)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn take_value(&mut self) -> CodecResult<Value> {
        let value = match self.take_u8()? {
            KIND_BOOL => Value::Bool(self.take_u8()? != 0),
            KIND_CHAR => {
                let scalar = self.take_u32()?;
                Value::Char(char::from_u32(scalar).ok_or(CodecError::InvalidChar(scalar))?)
            }
            KIND_I8 => Value::I8(self.take(1)?[0] as i8),
            KIND_I16 => {
                let bytes = self.take(2)?;
                Value::I16(i16::from_le_bytes([bytes[0], bytes[1]]))
            }
            KIND_I32 => {
                let bytes = self.take(4)?;
                Value::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            KIND_I64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8)?);
                Value::I64(i64::from_le_bytes(raw))
            }
            KIND_F32 => {
                let bytes = self.take(4)?;
                Value::F32(f32::from_bits(u32::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            }
            KIND_F64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8)?);
                Value::F64(f64::from_bits(u64::from_le_bytes(raw)))
            }
            KIND_OBJECT => Value::Object {
                type_name: self.take_str()?,
                text: self.take_str()?,
            },
            tag => return Err(CodecError::InvalidTag { what: "kind", tag }),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(event: Event) -> Event {
        let mut buf = Vec::new();
        write_event(&mut buf, &event).unwrap();
        read_event(&mut buf.as_slice()).unwrap().unwrap()
    }

    #[test]
    fn test_every_primitive_kind_round_trips() {
        let values = vec![
            Value::Bool(true),
            Value::Char('λ'),
            Value::I8(-8),
            Value::I16(-1600),
            Value::I32(123_456),
            Value::I64(-9_000_000_000),
            Value::F32(1.5),
            Value::F64(-2.25),
        ];
        let event = Event::Enter {
            thread_id: 3,
            time_ms: 1_000_000,
            class_name: "demo.Calc".to_string(),
            method_name: "add".to_string(),
            is_static: false,
            parameters: Some(values.clone()),
        };
        match round_trip(event) {
            Event::Enter { parameters, .. } => assert_eq!(parameters.unwrap(), values),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_object_fallback_round_trips() {
        let event = Event::Exception {
            thread_id: 1,
            time_ms: 5,
            thrown: Value::object("demo.Boom", "index 7 out of range"),
        };
        assert_eq!(round_trip(event.clone()), event);
    }

    #[test]
    fn test_absent_versus_empty_parameters() {
        let absent = Event::Enter {
            thread_id: 1,
            time_ms: 1,
            class_name: "C".to_string(),
            method_name: "m".to_string(),
            is_static: true,
            parameters: None,
        };
        let empty = Event::Enter {
            thread_id: 1,
            time_ms: 1,
            class_name: "C".to_string(),
            method_name: "m".to_string(),
            is_static: true,
            parameters: Some(Vec::new()),
        };
        assert_eq!(round_trip(absent.clone()), absent);
        assert_eq!(round_trip(empty.clone()), empty);
        assert_ne!(round_trip(absent), empty);
    }

    #[test]
    fn test_void_exit_round_trips() {
        let event = Event::Exit {
            thread_id: 2,
            time_ms: 9,
            return_value: None,
        };
        assert_eq!(round_trip(event.clone()), event);
    }

    #[test]
    fn test_stream_of_records_in_order() {
        let mut buf = Vec::new();
        for i in 0..5 {
            let event = Event::Exit {
                thread_id: 1,
                time_ms: i,
                return_value: Some(Value::I64(i)),
            };
            write_event(&mut buf, &event).unwrap();
        }
        let events = read_all(&mut buf.as_slice()).unwrap();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.time_ms(), i as i64);
        }
    }

    #[test]
    fn test_clean_eof_is_none() {
        assert!(read_event(&mut [].as_slice()).unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let mut buf = Vec::new();
        let event = Event::Exit {
            thread_id: 1,
            time_ms: 1,
            return_value: None,
        };
        write_event(&mut buf, &event).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            read_event(&mut buf.as_slice()),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_bad_variant_tag() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0i64.to_le_bytes());
        payload.extend_from_slice(&0i64.to_le_bytes());
        payload.push(9);
        assert!(matches!(
            decode_event(&payload),
            Err(CodecError::InvalidTag { what: "variant", .. })
        ));
    }
}
