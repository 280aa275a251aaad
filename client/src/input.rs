//! Console commands turned into sequenced intents

use shared::{Intent, Packet, ParticipantClass, Vec2};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("unknown command '{0}', type 'help' for a list")]
    UnknownCommand(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("{0}")]
    InvalidClass(String),
}

/// What a console line asks the client to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(Intent),
    Help,
    Quit,
    Nothing,
}

pub const HELP: &str = "commands: name <text> | class agile|heavy | left | right | stop | \
move <x> <y> | jump | fire <x> <y> | hook <x> <y> | quit";

pub fn parse_line(line: &str) -> Result<Command, InputError> {
    let mut words = line.split_whitespace();
    let verb = match words.next() {
        Some(verb) => verb.to_ascii_lowercase(),
        None => return Ok(Command::Nothing),
    };

    let intent = match verb.as_str() {
        "help" | "?" => return Ok(Command::Help),
        "quit" | "exit" => return Ok(Command::Quit),
        "name" => {
            let rest = line.trim_start()[verb.len()..].trim();
            if rest.is_empty() {
                return Err(InputError::MissingArgument("name"));
            }
            Intent::Rename(rest.to_string())
        }
        "class" => {
            let raw = words.next().ok_or(InputError::MissingArgument("class"))?;
            let class = raw
                .parse::<ParticipantClass>()
                .map_err(InputError::InvalidClass)?;
            Intent::SetClass(class)
        }
        "left" => Intent::Move(Vec2::new(-1.0, 0.0)),
        "right" => Intent::Move(Vec2::new(1.0, 0.0)),
        "stop" => Intent::Move(Vec2::ZERO),
        "move" => Intent::Move(parse_vector(&mut words, "move")?),
        "jump" => Intent::Jump,
        "fire" => Intent::Fire(parse_vector(&mut words, "fire")?),
        "hook" => Intent::Hook(parse_vector(&mut words, "hook")?),
        _ => return Err(InputError::UnknownCommand(verb)),
    };
    Ok(Command::Send(intent))
}

fn parse_vector<'a, I>(words: &mut I, command: &'static str) -> Result<Vec2, InputError>
where
    I: Iterator<Item = &'a str>,
{
    let mut next = || -> Result<f32, InputError> {
        let raw = words.next().ok_or(InputError::MissingArgument(command))?;
        raw.parse::<f32>()
            .map_err(|_| InputError::InvalidNumber(raw.to_string()))
    };
    let x = next()?;
    let y = next()?;
    Ok(Vec2::new(x, y))
}

/// Numbers outgoing intents so the server can discard stale datagrams
pub struct InputManager {
    next_sequence: u32,
}

impl InputManager {
    pub fn new() -> Self {
        Self { next_sequence: 1 }
    }

    pub fn packet_for(&mut self, intent: Intent) -> Packet {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Packet::Intent { sequence, intent }
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
