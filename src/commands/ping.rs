use bytes::Bytes;
use std::str;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns PONG if no argument is provided, otherwise echoes the argument back.
///
/// The echo is a simple string, unless the payload can't be carried by one (CR, LF or invalid
/// UTF-8), in which case it is sent back as a bulk string.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping {
    pub payload: Option<Bytes>,
}

impl Executable for Ping {
    fn exec(self, _store: Store) -> Result<Frame, Error> {
        let Some(payload) = self.payload else {
            return Ok(Frame::Simple("PONG".to_string()));
        };

        let res = match str::from_utf8(&payload) {
            Ok(s) if !s.contains(['\r', '\n']) => Frame::Simple(s.to_string()),
            _ => Frame::Bulk(payload),
        };

        Ok(res)
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let payload = match parser.next_bytes() {
            Ok(payload) => Some(payload),
            Err(CommandParserError::EndOfStream) => None,
            Err(e) => return Err(e),
        };

        Ok(Self { payload })
    }
}
