// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;
use std::str;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Deepest array nesting `Frame::parse` accepts.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("stream ended in the middle of a frame")]
    Truncated,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("invalid length header: {0:?}")]
    InvalidLength(String),
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),
    #[error("bulk string payload is not followed by CRLF")]
    InvalidTerminator,
    #[error("protocol error; invalid UTF-8 string")]
    Utf8(#[from] str::Utf8Error),
    #[error("frame size exceeds limit of {0} bytes")]
    FrameTooLarge(usize),
    #[error("array nesting exceeds limit of {0} levels")]
    TooDeep(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single RESP value.
///
/// `Null` is the null bulk string, `$-1\r\n` on the wire. Every other bulk string, including the
/// empty one, is a `Bulk`.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Builds the array of bulk strings clients use to send a command.
    pub fn command<I, T>(parts: I) -> Frame
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Frame::Array(parts.into_iter().map(|p| Frame::Bulk(p.into())).collect())
    }

    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_at(src, 0)
    }

    fn parse_at(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let (line, _) = get_line(src)?;
                Ok(Frame::Simple(str::from_utf8(line)?.to_string()))
            }
            DataType::SimpleError => {
                let (line, _) = get_line(src)?;
                Ok(Frame::Error(str::from_utf8(line)?.to_string()))
            }
            DataType::Integer => {
                let (line, _) = get_line(src)?;
                let integer = parse_decimal(line).ok_or_else(|| {
                    Error::InvalidInteger(String::from_utf8_lossy(line).into_owned())
                })?;

                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                // RESP2 encodes the null bulk string as a negative length with no payload.
                let Ok(length) = usize::try_from(get_length(src)?) else {
                    return Ok(Frame::Null);
                };

                // The payload is length-prefixed, so it may contain CRLF itself.
                let data = Bytes::copy_from_slice(get_bytes(src, length)?);
                skip_crlf(src)?;

                Ok(Frame::Bulk(data))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let Ok(length) = usize::try_from(get_length(src)?) else {
                    return Ok(Frame::Null);
                };

                if depth >= MAX_DEPTH {
                    return Err(Error::TooDeep(MAX_DEPTH));
                }

                let mut frames = Vec::with_capacity(length.min(64));
                for _ in 0..length {
                    frames.push(Self::parse_at(src, depth + 1)?);
                }

                Ok(Frame::Array(frames))
            }
            DataType::Null => {
                get_line(src)?;
                Ok(Frame::Null)
            }
        }
    }

    /// Appends the wire representation of the frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(u8::from(DataType::SimpleString));
                put_line(dst, s);
            }
            Frame::Error(s) => {
                dst.put_u8(u8::from(DataType::SimpleError));
                put_line(dst, s);
            }
            Frame::Integer(i) => {
                dst.put_u8(u8::from(DataType::Integer));
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.put_u8(u8::from(DataType::BulkString));
                dst.put_slice(bytes.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(bytes);
                dst.put_slice(CRLF);
            }
            Frame::Null => {
                dst.put_slice(b"$-1");
                dst.put_slice(CRLF);
            }
            Frame::Array(arr) => {
                dst.put_u8(u8::from(DataType::Array));
                dst.put_slice(arr.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                for frame in arr {
                    frame.write_to(dst);
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = BytesMut::new();
        self.write_to(&mut bytes);
        bytes.to_vec()
    }

    pub fn as_simple(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            Frame::Error(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Frame::Bulk(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "(nil)"),
            Frame::Array(arr) => {
                write!(f, "[")?;
                for (i, frame) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Reads up to the next CRLF. Returns the line without the terminator and the number of bytes
/// consumed, terminator included.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<(&'a [u8], usize), Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    let rest = buf.get(start..).ok_or(Error::Incomplete)?;

    let end = rest
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)?;

    let consumed = end + CRLF.len();
    src.set_position((start + consumed) as u64);

    Ok((&rest[..end], consumed))
}

/// Writes `line` and its terminator. Simple strings and errors can't carry CR or LF, so those are
/// written as spaces.
fn put_line(dst: &mut BytesMut, line: &str) {
    dst.extend(
        line.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    dst.put_slice(CRLF);
}

fn get_length(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let (line, _) = get_line(src)?;
    parse_decimal(line).ok_or_else(|| Error::InvalidLength(String::from_utf8_lossy(line).into()))
}

fn get_bytes<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], Error> {
    if src.remaining() < len {
        return Err(Error::Incomplete);
    }

    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    src.advance(len);

    Ok(&buf[start..start + len])
}

fn skip_crlf(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
    if src.remaining() < CRLF.len() {
        return Err(Error::Incomplete);
    }
    if src.chunk()[..CRLF.len()] != CRLF[..] {
        return Err(Error::InvalidTerminator);
    }
    src.advance(CRLF.len());
    Ok(())
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

fn parse_decimal(line: &[u8]) -> Option<i64> {
    str::from_utf8(line).ok()?.parse::<i64>().ok()
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
    // RESP3 null. Accepted on input only, replies use the RESP2 null bulk string.
    Null, // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
            DataType::Null => b'_',
        }
    }
}
