use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns all fields and values of the hash stored at `key`, as a flat array alternating field
/// and value. Order is unspecified. A missing hash yields `nil`.
///
/// Ref: <https://redis.io/docs/latest/commands/hgetall/>
#[derive(Debug, PartialEq)]
pub struct Hgetall {
    pub key: String,
}

impl Executable for Hgetall {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let Some(entries) = store.hgetall(&self.key) else {
            return Ok(Frame::Null);
        };

        let frames = entries
            .into_iter()
            .flat_map(|(field, value)| [Frame::Bulk(Bytes::from(field)), Frame::Bulk(value)])
            .collect();

        Ok(Frame::Array(frames))
    }
}

impl TryFrom<&mut CommandParser> for Hgetall {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use std::collections::HashMap;

    fn pairs(frame: Frame) -> HashMap<Bytes, Bytes> {
        let Frame::Array(frames) = frame else {
            panic!("expected an array");
        };
        assert_eq!(frames.len() % 2, 0);

        frames
            .chunks(2)
            .map(|pair| {
                (
                    pair[0].as_bulk().unwrap().clone(),
                    pair[1].as_bulk().unwrap().clone(),
                )
            })
            .collect()
    }

    #[test]
    fn populated_hash() {
        let store = Store::new();
        for (field, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
            store.hset(String::from("h"), field.to_string(), Bytes::from(value));
        }
        store.hset(String::from("h"), String::from("b"), Bytes::from("20"));

        let cmd = Command::try_from(Frame::command(["HGETALL", "h"])).unwrap();
        assert_eq!(
            cmd,
            Command::Hgetall(Hgetall {
                key: String::from("h")
            })
        );

        let res = cmd.exec(store).unwrap();

        assert_eq!(res.as_array().map(|a| a.len()), Some(6));
        assert_eq!(
            pairs(res),
            HashMap::from([
                (Bytes::from("a"), Bytes::from("1")),
                (Bytes::from("b"), Bytes::from("20")),
                (Bytes::from("c"), Bytes::from("3")),
            ])
        );
    }

    #[test]
    fn missing_hash() {
        let store = Store::new();
        store.set(String::from("h"), Bytes::from("a string"));

        let cmd = Command::try_from(Frame::command(["HGETALL", "h"])).unwrap();

        assert_eq!(cmd.exec(store).unwrap(), Frame::Null);
    }

    #[test]
    fn wrong_number_of_arguments() {
        for frame in [
            Frame::command(["HGETALL"]),
            Frame::command(["HGETALL", "h", "g"]),
        ] {
            assert_eq!(
                Command::try_from(frame),
                Err(CommandParserError::WrongNumberOfArguments {
                    command: String::from("hgetall")
                })
            );
        }
    }
}
