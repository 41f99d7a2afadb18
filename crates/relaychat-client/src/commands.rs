//! User command parsing for the chat prompt.
//!
//! Commands are whitespace-separated tokens introduced by a `%` and a
//! case-insensitive letter. Message text is everything after the last
//! required token with one separator stripped, so internal spacing
//! survives untouched.

use std::fmt;

use relaychat_core::protocol::MAX_MULTICAST_DESTS;
use relaychat_core::Handle;

/// A parsed prompt command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `%M dest [text…]`
    Unicast {
        /// Destination handle.
        dest: Handle,
        /// Message text, possibly empty.
        text: String,
    },
    /// `%B [text…]`
    Broadcast {
        /// Message text, possibly empty.
        text: String,
    },
    /// `%C k d1 … dk [text…]` with 2 ≤ k ≤ 9.
    Multicast {
        /// Destination handles in command order.
        dests: Vec<Handle>,
        /// Message text, possibly empty.
        text: String,
    },
    /// `%L`
    List,
    /// `%H`
    Help,
}

/// Why a line failed to parse. The display strings are exactly what the
/// prompt prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Not a recognized `%` command.
    Invalid,
    /// A required token is missing or unusable.
    Format,
    /// Multicast handle count outside 2..=9.
    MulticastCount,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Invalid => f.write_str("Invalid command"),
            CommandError::Format => f.write_str("Invalid command format"),
            CommandError::MulticastCount => {
                f.write_str("Invalid number of handles for multicast")
            }
        }
    }
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let mut tokens = Tokens::new(line);
    let first = tokens.next_token().ok_or(CommandError::Invalid)?;
    if first.len() != 2 || !first.starts_with('%') {
        return Err(CommandError::Invalid);
    }

    match first.as_bytes()[1].to_ascii_uppercase() {
        b'M' => {
            let dest = required_handle(&mut tokens)?;
            Ok(Command::Unicast {
                dest,
                text: tokens.remainder().to_owned(),
            })
        }
        b'B' => Ok(Command::Broadcast {
            text: tokens.remainder().to_owned(),
        }),
        b'C' => {
            let count: usize = tokens
                .next_token()
                .ok_or(CommandError::Format)?
                .parse()
                .map_err(|_| CommandError::MulticastCount)?;
            if !(2..=MAX_MULTICAST_DESTS).contains(&count) {
                return Err(CommandError::MulticastCount);
            }
            let mut dests = Vec::with_capacity(count);
            for _ in 0..count {
                dests.push(required_handle(&mut tokens)?);
            }
            Ok(Command::Multicast {
                dests,
                text: tokens.remainder().to_owned(),
            })
        }
        b'L' => Ok(Command::List),
        b'H' => Ok(Command::Help),
        _ => Err(CommandError::Invalid),
    }
}

/// Help text printed for `%H`.
pub fn help_text() -> &'static str {
    "Commands:\n\
     \x20 %M <handle> [text]            private message to one handle\n\
     \x20 %B [text]                     broadcast to every other client\n\
     \x20 %C <n> <h1> ... <hn> [text]   multicast to 2-9 handles\n\
     \x20 %L                            list registered handles\n\
     \x20 %H                            show this help"
}

fn required_handle(tokens: &mut Tokens<'_>) -> Result<Handle, CommandError> {
    let token = tokens.next_token().ok_or(CommandError::Format)?;
    Handle::new(token).map_err(|_| CommandError::Format)
}

/// Whitespace tokenizer that can hand back the untouched tail of the
/// line once the fixed tokens are consumed.
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            rest: line.trim_end_matches(['\r', '\n']),
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        match trimmed.find(char::is_whitespace) {
            Some(end) => {
                let token = &trimmed[..end];
                let mut tail = trimmed[end..].chars();
                tail.next();
                self.rest = tail.as_str();
                Some(token)
            }
            None => {
                self.rest = "";
                Some(trimmed)
            }
        }
    }

    /// The line past the last consumed token, one separator stripped.
    fn remainder(self) -> &'a str {
        self.rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> Handle {
        Handle::new(name).expect("valid handle")
    }

    #[test]
    fn unicast_with_text() {
        assert_eq!(
            parse("%M bob hi there"),
            Ok(Command::Unicast {
                dest: handle("bob"),
                text: "hi there".into(),
            })
        );
    }

    #[test]
    fn command_letter_is_case_insensitive() {
        assert_eq!(
            parse("%m bob hi"),
            Ok(Command::Unicast {
                dest: handle("bob"),
                text: "hi".into(),
            })
        );
        assert_eq!(parse("%l"), Ok(Command::List));
        assert_eq!(parse("%h"), Ok(Command::Help));
    }

    #[test]
    fn unicast_without_text_is_empty_text() {
        assert_eq!(
            parse("%M bob"),
            Ok(Command::Unicast {
                dest: handle("bob"),
                text: String::new(),
            })
        );
    }

    #[test]
    fn text_preserves_internal_spacing() {
        assert_eq!(
            parse("%M bob two  spaces   here"),
            Ok(Command::Unicast {
                dest: handle("bob"),
                text: "two  spaces   here".into(),
            })
        );
        assert_eq!(
            parse("%B  leading space kept"),
            Ok(Command::Broadcast {
                text: " leading space kept".into(),
            })
        );
    }

    #[test]
    fn broadcast_with_and_without_text() {
        assert_eq!(
            parse("%B hello all"),
            Ok(Command::Broadcast {
                text: "hello all".into(),
            })
        );
        assert_eq!(
            parse("%B"),
            Ok(Command::Broadcast {
                text: String::new(),
            })
        );
    }

    #[test]
    fn multicast_parses_count_and_handles() {
        assert_eq!(
            parse("%C 3 bob carol dave hey"),
            Ok(Command::Multicast {
                dests: vec![handle("bob"), handle("carol"), handle("dave")],
                text: "hey".into(),
            })
        );
    }

    #[test]
    fn multicast_count_boundaries() {
        assert!(parse("%C 2 a b x").is_ok());
        assert!(parse("%C 9 a b c d e f g h i x").is_ok());
        assert_eq!(parse("%C 1 a x"), Err(CommandError::MulticastCount));
        assert_eq!(parse("%C 10 a b c x"), Err(CommandError::MulticastCount));
        assert_eq!(parse("%C zero a b"), Err(CommandError::MulticastCount));
    }

    #[test]
    fn multicast_missing_handles_is_a_format_error() {
        assert_eq!(parse("%C 3 bob carol"), Err(CommandError::Format));
        assert_eq!(parse("%C"), Err(CommandError::Format));
    }

    #[test]
    fn missing_unicast_destination_is_a_format_error() {
        assert_eq!(parse("%M"), Err(CommandError::Format));
        assert_eq!(parse("%M   "), Err(CommandError::Format));
    }

    #[test]
    fn oversized_destination_is_a_format_error() {
        let line = format!("%M {} hi", "x".repeat(101));
        assert_eq!(parse(&line), Err(CommandError::Format));
    }

    #[test]
    fn unknown_commands_are_invalid() {
        assert_eq!(parse("hello"), Err(CommandError::Invalid));
        assert_eq!(parse("%Q"), Err(CommandError::Invalid));
        assert_eq!(parse("%"), Err(CommandError::Invalid));
        assert_eq!(parse("%MX bob"), Err(CommandError::Invalid));
        assert_eq!(parse(""), Err(CommandError::Invalid));
    }

    #[test]
    fn trailing_newline_is_stripped() {
        assert_eq!(
            parse("%M bob hi\n"),
            Ok(Command::Unicast {
                dest: handle("bob"),
                text: "hi".into(),
            })
        );
    }
}
