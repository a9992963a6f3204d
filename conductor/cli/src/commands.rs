//! REPL command parsing
//!
//! Anything that does not start with `/` is a prompt.

use chat_conductor_core::{Conversation, ConversationId};
use thiserror::Error;

/// One line of user input
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Send a prompt
    Send(String),
    /// Stop the live stream
    Stop,
    /// Start a new conversation
    New,
    /// List conversations
    List,
    /// Switch to a conversation (list index or id)
    Select(String),
    /// Delete a conversation (list index or id)
    Delete(String),
    /// Delete every conversation
    Clear,
    /// Set the base mode
    Mode(String),
    /// Toggle retrieval augmentation
    Rag(bool),
    /// Re-ask the last user message
    Retry,
    /// Send a prompt as a guided learning turn
    Guide(String),
    /// Set the topic of the next guided session
    Topic(String),
    /// Show guided learning progress
    Progress,
    /// Forget the guided learning session
    EndGuide,
    /// Show scheduled tasks
    Tasks,
    /// Show help
    Help,
    /// Leave the REPL
    Quit,
    /// Blank line
    Empty,
}

/// Why a line could not be parsed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown slash command
    #[error("unknown command '/{0}' (try /help)")]
    Unknown(String),

    /// Command needs an argument
    #[error("/{command} needs {what}")]
    MissingArgument {
        /// Command name
        command: &'static str,
        /// What was expected
        what: &'static str,
    },

    /// Argument could not be understood
    #[error("invalid argument for /{command}: '{value}'")]
    InvalidArgument {
        /// Command name
        command: &'static str,
        /// The offending value
        value: String,
    },
}

pub const HELP: &str = "\
Type a message and press enter to send it.

  /new              start a new conversation
  /list             list conversations
  /select <n|id>    switch conversation
  /delete <n|id>    delete conversation
  /clear            delete every conversation
  /stop             stop the current answer
  /retry            ask the last question again
  /mode <name>      set the chat mode
  /rag on|off       toggle retrieval augmentation
  /guide <text>     send as a guided learning turn
  /topic <name>     topic for the next guided session
  /progress         show guided learning progress
  /endguide         end the guided session
  /tasks            show scheduled tasks
  /quit             exit";

/// Parse one input line
pub fn parse_line(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name {
        "stop" => Ok(Command::Stop),
        "new" => Ok(Command::New),
        "list" | "ls" => Ok(Command::List),
        "select" | "s" => required(arg, "select", "a conversation number or id").map(Command::Select),
        "delete" | "rm" => required(arg, "delete", "a conversation number or id").map(Command::Delete),
        "clear" => Ok(Command::Clear),
        "mode" => required(arg, "mode", "a mode name").map(Command::Mode),
        "rag" => match arg {
            "on" | "true" | "1" => Ok(Command::Rag(true)),
            "off" | "false" | "0" => Ok(Command::Rag(false)),
            "" => Err(CommandError::MissingArgument {
                command: "rag",
                what: "on or off",
            }),
            other => Err(CommandError::InvalidArgument {
                command: "rag",
                value: other.to_string(),
            }),
        },
        "retry" => Ok(Command::Retry),
        "guide" | "g" => required(arg, "guide", "a message").map(Command::Guide),
        "topic" => required(arg, "topic", "a topic name").map(Command::Topic),
        "progress" => Ok(Command::Progress),
        "endguide" => Ok(Command::EndGuide),
        "tasks" => Ok(Command::Tasks),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn required(arg: &str, command: &'static str, what: &'static str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument { command, what })
    } else {
        Ok(arg.to_string())
    }
}

/// Resolve a 1-based list index or a conversation id
///
/// Unknown ids pass through unchanged; the conductor treats them as no-ops.
pub fn resolve_conversation(conversations: &[Conversation], arg: &str) -> ConversationId {
    arg.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| conversations.get(index))
        .map_or_else(|| ConversationId::new(arg), |conv| conv.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_text_is_a_prompt() {
        assert_eq!(
            parse_line("  what is rust?  ").unwrap(),
            Command::Send("what is rust?".to_string())
        );
        assert_eq!(parse_line("   ").unwrap(), Command::Empty);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(parse_line("/stop").unwrap(), Command::Stop);
        assert_eq!(parse_line("/ls").unwrap(), Command::List);
        assert_eq!(
            parse_line("/select 2").unwrap(),
            Command::Select("2".to_string())
        );
        assert_eq!(
            parse_line("/mode  socratic ").unwrap(),
            Command::Mode("socratic".to_string())
        );
        assert_eq!(parse_line("/rag on").unwrap(), Command::Rag(true));
        assert_eq!(parse_line("/rag off").unwrap(), Command::Rag(false));
    }

    #[test]
    fn test_guided_commands() {
        assert_eq!(
            parse_line("/guide what is a limit?").unwrap(),
            Command::Guide("what is a limit?".to_string())
        );
        assert_eq!(
            parse_line("/topic Linear algebra").unwrap(),
            Command::Topic("Linear algebra".to_string())
        );
        assert_eq!(parse_line("/progress").unwrap(), Command::Progress);
        assert_eq!(parse_line("/endguide").unwrap(), Command::EndGuide);
        assert!(matches!(
            parse_line("/guide").unwrap_err(),
            CommandError::MissingArgument { command: "guide", .. }
        ));
    }

    #[test]
    fn test_command_errors() {
        assert_eq!(
            parse_line("/frobnicate").unwrap_err(),
            CommandError::Unknown("frobnicate".to_string())
        );
        assert!(matches!(
            parse_line("/delete").unwrap_err(),
            CommandError::MissingArgument { command: "delete", .. }
        ));
        assert!(matches!(
            parse_line("/rag maybe").unwrap_err(),
            CommandError::InvalidArgument { command: "rag", .. }
        ));
    }

    #[test]
    fn test_resolve_conversation() {
        let first = Conversation::new(ConversationId::new("aaa"));
        let second = Conversation::new(ConversationId::new("bbb"));
        let conversations = vec![first, second];

        assert_eq!(
            resolve_conversation(&conversations, "2"),
            ConversationId::new("bbb")
        );
        assert_eq!(
            resolve_conversation(&conversations, "aaa"),
            ConversationId::new("aaa")
        );
        // Out of range falls through as a literal id
        assert_eq!(
            resolve_conversation(&conversations, "0"),
            ConversationId::new("0")
        );
    }
}
