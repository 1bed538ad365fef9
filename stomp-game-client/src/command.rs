//! Keyboard command parsing and dispatch.
//!
//! Each line typed by the user becomes a [`UserCommand`], which
//! [`dispatch`] turns into session operations and the frames to send.

use std::path::PathBuf;

use crate::{error::ClientError, event::GameEvents, frame::Frame, session::Session};

const LOGIN_USAGE: &str = "login {host:port} {username} {password}";
const JOIN_USAGE: &str = "join {game_name}";
const EXIT_USAGE: &str = "exit {game_name}";
const REPORT_USAGE: &str = "report {file}";
const SUMMARY_USAGE: &str = "summary {game_name} {user} {file}";
const LOGOUT_USAGE: &str = "logout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Login {
        host_port: String,
        username: String,
        password: String,
    },
    Join {
        game: String,
    },
    Exit {
        game: String,
    },
    Report {
        path: PathBuf,
    },
    Summary {
        game: String,
        user: String,
        path: PathBuf,
    },
    Logout,
}

impl UserCommand {
    /// Parses one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ClientError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&word, args)) = parts.split_first() else {
            return Ok(None);
        };

        let command = match (word, args) {
            ("login", [host_port, username, password]) => {
                if !is_host_port(host_port) {
                    return Err(ClientError::Usage(LOGIN_USAGE));
                }
                UserCommand::Login {
                    host_port: host_port.to_string(),
                    username: username.to_string(),
                    password: password.to_string(),
                }
            }
            ("login", _) => return Err(ClientError::Usage(LOGIN_USAGE)),
            ("join", [game]) => UserCommand::Join {
                game: game.to_string(),
            },
            ("join", _) => return Err(ClientError::Usage(JOIN_USAGE)),
            ("exit", [game]) => UserCommand::Exit {
                game: game.to_string(),
            },
            ("exit", _) => return Err(ClientError::Usage(EXIT_USAGE)),
            ("report", [path]) => UserCommand::Report {
                path: PathBuf::from(path),
            },
            ("report", _) => return Err(ClientError::Usage(REPORT_USAGE)),
            ("summary", [game, user, path]) => UserCommand::Summary {
                game: game.to_string(),
                user: user.to_string(),
                path: PathBuf::from(path),
            },
            ("summary", _) => return Err(ClientError::Usage(SUMMARY_USAGE)),
            ("logout", []) => UserCommand::Logout,
            ("logout", _) => return Err(ClientError::Usage(LOGOUT_USAGE)),
            (other, _) => return Err(ClientError::UnknownCommand(other.to_string())),
        };

        Ok(Some(command))
    }
}

fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Frames to put on the wire plus an optional line for the user.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub frames: Vec<Frame>,
    pub notice: Option<String>,
}

impl Dispatched {
    fn send(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            notice: None,
        }
    }
}

pub async fn dispatch(
    session: &mut Session,
    command: UserCommand,
) -> Result<Dispatched, ClientError> {
    match command {
        UserCommand::Login {
            host_port,
            username,
            password,
        } => session
            .login(&host_port, &username, &password)
            .map(Dispatched::send),
        UserCommand::Join { game } => session.join(&game).map(Dispatched::send),
        UserCommand::Exit { game } => session.exit(&game).map(Dispatched::send),
        UserCommand::Report { path } => {
            // Check the session before touching the file system.
            if !session.is_connected() {
                return Err(ClientError::NotConnected);
            }
            let game = GameEvents::load(&path).await?;
            let game_name = game.game_name();
            let frames = session.report(game)?;
            let notice = format!("Reported {} events to {game_name}", frames.len());
            Ok(Dispatched {
                frames,
                notice: Some(notice),
            })
        }
        UserCommand::Summary { game, user, path } => {
            let summary = session.summary(&game, &user)?;
            summary.write_to(&path).await?;
            Ok(Dispatched {
                frames: Vec::new(),
                notice: Some(format!("Summary written to {}", path.display())),
            })
        }
        UserCommand::Logout => session.logout().map(Dispatched::send),
    }
}
