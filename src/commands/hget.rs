use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns the value associated with `field` in the hash stored at `key`, or `nil` when either
/// the hash or the field is missing.
///
/// Ref: <https://redis.io/docs/latest/commands/hget/>
#[derive(Debug, PartialEq)]
pub struct Hget {
    pub key: String,
    pub field: String,
}

impl Executable for Hget {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let res = store
            .hget(&self.key, &self.field)
            .map_or(Frame::Null, Frame::Bulk);

        Ok(res)
    }
}

impl TryFrom<&mut CommandParser> for Hget {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let field = parser.next_string()?;

        Ok(Self { key, field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use bytes::Bytes;

    #[test]
    fn existing_field() {
        let store = Store::new();
        store.hset(String::from("h"), String::from("f"), Bytes::from("v"));

        let cmd = Command::try_from(Frame::command(["HGET", "h", "f"])).unwrap();

        assert_eq!(
            cmd,
            Command::Hget(Hget {
                key: String::from("h"),
                field: String::from("f"),
            })
        );
        assert_eq!(cmd.exec(store).unwrap(), Frame::Bulk(Bytes::from("v")));
    }

    #[test]
    fn missing_hash_or_field() {
        let store = Store::new();
        store.hset(String::from("h"), String::from("f"), Bytes::from("v"));

        let cmd = Command::try_from(Frame::command(["HGET", "nope", "f"])).unwrap();
        assert_eq!(cmd.exec(store.clone()).unwrap(), Frame::Null);

        let cmd = Command::try_from(Frame::command(["HGET", "h", "nope"])).unwrap();
        assert_eq!(cmd.exec(store.clone()).unwrap(), Frame::Null);
    }

    #[test]
    fn wrong_number_of_arguments() {
        for frame in [
            Frame::command(["HGET", "h"]),
            Frame::command(["HGET", "h", "f", "g"]),
        ] {
            assert_eq!(
                Command::try_from(frame),
                Err(CommandParserError::WrongNumberOfArguments {
                    command: String::from("hget")
                })
            );
        }
    }
}
