use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures reported back to the user for a single command.
///
/// None of these end the session on their own except [`ClientError::Transport`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Please login first")]
    NotConnected,

    #[error("The client is already logged in, log out before trying again")]
    AlreadyLoggedIn,

    #[error("Error: Not subscribed to {0}")]
    NotSubscribed(String),

    #[error("Already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("Already logging out, waiting for the server")]
    LogoutPending,

    #[error("No reports from {user} for {game}")]
    NoReports { game: String, user: String },

    #[error("Could not access {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid event file {}: {source}", path.display())]
    EventFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not connect to server {addr}: {source}")]
    Transport {
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Usage,
    State,
    File,
    Transport,
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Usage(_) | ClientError::UnknownCommand(_) => ErrorCategory::Usage,
            ClientError::NotConnected
            | ClientError::AlreadyLoggedIn
            | ClientError::NotSubscribed(_)
            | ClientError::AlreadySubscribed(_)
            | ClientError::LogoutPending
            | ClientError::NoReports { .. } => ErrorCategory::State,
            ClientError::File { .. } | ClientError::EventFile { .. } => ErrorCategory::File,
            ClientError::Transport { .. } => ErrorCategory::Transport,
        }
    }

    /// Fatal errors end the session; everything else only drops the command.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}
