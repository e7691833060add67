pub mod executable;
pub mod get;
pub mod hget;
pub mod hgetall;
pub mod hset;
pub mod info;
pub mod ping;
pub mod set;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;
use tracing::debug;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

use get::Get;
use hget::Hget;
use hgetall::Hgetall;
use hset::Hset;
use info::Info;
use ping::Ping;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Get(Get),
    Hget(Hget),
    Hgetall(Hgetall),
    Hset(Hset),
    Set(Set),

    Info(Info),
    Ping(Ping),
}

impl Command {
    /// Lower-case command name, as used in error replies.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "get",
            Command::Hget(_) => "hget",
            Command::Hgetall(_) => "hgetall",
            Command::Hset(_) => "hset",
            Command::Set(_) => "set",
            Command::Info(_) => "info",
            Command::Ping(_) => "ping",
        }
    }

    /// Whether the command mutates the store and therefore belongs in the append-only log.
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set(_) | Command::Hset(_))
    }
}

impl Executable for Command {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        match self {
            Command::Get(cmd) => cmd.exec(store),
            Command::Hget(cmd) => cmd.exec(store),
            Command::Hgetall(cmd) => cmd.exec(store),
            Command::Hset(cmd) => cmd.exec(store),
            Command::Info(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = CommandParserError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                })
            }
        };

        let parser = &mut CommandParser {
            parts: frames.into_iter(),
        };

        let command_name = parser.parse_command_name()?;

        let command = match &command_name[..] {
            "get" => Get::try_from(&mut *parser).map(Command::Get),
            "hget" => Hget::try_from(&mut *parser).map(Command::Hget),
            "hgetall" => Hgetall::try_from(&mut *parser).map(Command::Hgetall),
            "hset" => Hset::try_from(&mut *parser).map(Command::Hset),
            "info" => Info::try_from(&mut *parser).map(Command::Info),
            "ping" => Ping::try_from(&mut *parser).map(Command::Ping),
            "set" => Set::try_from(&mut *parser).map(Command::Set),
            _ => {
                return Err(CommandParserError::UnknownCommand {
                    command: command_name,
                })
            }
        };

        // Running out of arguments, or having some left over, is an arity mismatch.
        let command = match command {
            Err(CommandParserError::EndOfStream) => Err(CommandParserError::WrongNumberOfArguments {
                command: command_name.clone(),
            }),
            other => other,
        }?;

        if parser.has_remaining() {
            return Err(CommandParserError::WrongNumberOfArguments {
                command: command_name,
            });
        }

        Ok(command)
    }
}

/// Parses `frame` as a command and runs it against `store`.
///
/// Never fails: protocol and command errors are turned into an error reply so the caller can send
/// it back and keep serving the connection.
pub fn dispatch(frame: Frame, store: &Store) -> Frame {
    match Command::try_from(frame) {
        Ok(cmd) => execute(cmd, store),
        Err(err) => {
            debug!("Rejected command: {}", err);
            Frame::Error(err.to_string())
        }
    }
}

/// Runs an already parsed command, turning an execution error into an error reply.
pub fn execute(cmd: Command, store: &Store) -> Frame {
    let name = cmd.name();
    cmd.exec(store.clone()).unwrap_or_else(|err| {
        debug!("Command {} failed: {}", name, err);
        Frame::Error(format!("ERR {}", err))
    })
}

pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self
            .parts
            .next()
            .ok_or(CommandParserError::EmptyCommand)?;

        match command_name {
            Frame::Simple(s) => Ok(s.to_lowercase()),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn has_remaining(&self) -> bool {
        self.parts.len() > 0
    }

    /// Discards every argument not consumed yet.
    fn skip_rest(&mut self) {
        self.parts.by_ref().for_each(drop);
    }

    fn next_string(&mut self) -> Result<String, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("ERR protocol error; invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("ERR protocol error; empty command")]
    EmptyCommand,
    #[error("ERR unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongNumberOfArguments { command: String },
    #[error("ERR protocol error; invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("ERR protocol error; attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
}
