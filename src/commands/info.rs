use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

const INFO: &str = concat!(
    "minidis ",
    env!("CARGO_PKG_VERSION"),
    ", a Redis compatible key-value server"
);

/// Any arguments are accepted and ignored.
#[derive(Debug, PartialEq)]
pub struct Info;

impl Executable for Info {
    fn exec(self, _store: Store) -> Result<Frame, Error> {
        Ok(Frame::Simple(INFO.to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Info {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        parser.skip_rest();
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    #[test]
    fn ignores_arguments() {
        for frame in [
            Frame::command(["INFO"]),
            Frame::command(["INFO", "server"]),
            Frame::command(["INFO", "server", "clients", "memory"]),
        ] {
            let cmd = Command::try_from(frame).unwrap();

            assert_eq!(cmd, Command::Info(Info));
            assert_eq!(cmd.exec(Store::new()).unwrap(), Frame::Simple(INFO.to_string()));
        }
    }
}
