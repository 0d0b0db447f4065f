//! Inbound line tokenizer.
//!
//! A line starting with `/` is a command: the first whitespace-delimited
//! token (case-insensitive) picks the command, the rest are arguments.
//! Anything else is chat.

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    Whisper { target: String, text: String },
    Rename { name: String },
    Kick { target: String, password: String },
    ListClients,
    /// Lowercased command token, slash included.
    Unknown(String),
}

/// A known command with the wrong number of arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Usage: {usage}")]
pub struct UsageError {
    pub command: &'static str,
    pub usage: &'static str,
}

const WHISPER_USAGE: UsageError = UsageError {
    command: "/w",
    usage: "/w <username> <message>",
};
const RENAME_USAGE: UsageError = UsageError {
    command: "/username",
    usage: "/username <newName>",
};
const KICK_USAGE: UsageError = UsageError {
    command: "/kick",
    usage: "/kick <username> <adminPassword>",
};

impl Command {
    /// Classify one trimmed, non-empty line.
    pub fn parse(line: &str) -> Result<Self, UsageError> {
        if !line.starts_with('/') {
            return Ok(Self::Chat(line.to_owned()));
        }

        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap_or("/").to_lowercase();
        let args: Vec<&str> = tokens.collect();

        match name.as_str() {
            "/w" | "/whisper" => match args.as_slice() {
                [target, rest @ ..] if !rest.is_empty() => Ok(Self::Whisper {
                    target: (*target).to_owned(),
                    text: rest.join(" "),
                }),
                _ => Err(WHISPER_USAGE),
            },
            "/username" => match args.as_slice() {
                [name] => Ok(Self::Rename {
                    name: (*name).to_owned(),
                }),
                _ => Err(RENAME_USAGE),
            },
            "/kick" => match args.as_slice() {
                [target, password] => Ok(Self::Kick {
                    target: (*target).to_owned(),
                    password: (*password).to_owned(),
                }),
                _ => Err(KICK_USAGE),
            },
            "/clientlist" => Ok(Self::ListClients),
            _ => Ok(Self::Unknown(name)),
        }
    }

    /// Label used for this command in the audit log.
    pub fn label(&self) -> &str {
        match self {
            Self::Chat(_) => "chat",
            Self::Whisper { .. } => "/w",
            Self::Rename { .. } => "/username",
            Self::Kick { .. } => "/kick",
            Self::ListClients => "/clientlist",
            Self::Unknown(name) => name,
        }
    }
}
