//! Match events: the in-memory record, the SEND/MESSAGE body grammar, and
//! the JSON event file users report from.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ClientError;

/// Key → value updates attached to an event. Keys iterate in sorted order.
pub type Updates = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    pub team_a_name: String,
    pub team_b_name: String,
    pub name: String,
    /// Seconds since kickoff.
    pub time: i64,
    pub general: Updates,
    pub team_a: Updates,
    pub team_b: Updates,
    pub description: String,
}

impl Event {
    /// Channel name shared by everyone reporting this match.
    pub fn game_name(&self) -> String {
        game_name(&self.team_a_name, &self.team_b_name)
    }

    /// Renders the event as a SEND body authored by `user`.
    pub fn to_body(&self, user: &str) -> String {
        // Writing into a String cannot fail.
        let mut body = String::new();
        let _ = writeln!(body, "user: {user}");
        let _ = writeln!(body, "team a: {}", self.team_a_name);
        let _ = writeln!(body, "team b: {}", self.team_b_name);
        let _ = writeln!(body, "event name: {}", self.name);
        let _ = writeln!(body, "time: {}", self.time);
        push_section(&mut body, GENERAL_SECTION, &self.general);
        push_section(&mut body, TEAM_A_SECTION, &self.team_a);
        push_section(&mut body, TEAM_B_SECTION, &self.team_b);
        let _ = writeln!(body, "{DESCRIPTION_SECTION}:");
        let _ = writeln!(body, "{}", self.description);
        body
    }
}

pub fn game_name(team_a: &str, team_b: &str) -> String {
    format!("{team_a}_{team_b}")
}

const GENERAL_SECTION: &str = "general game updates";
const TEAM_A_SECTION: &str = "team a updates";
const TEAM_B_SECTION: &str = "team b updates";
const DESCRIPTION_SECTION: &str = "description";

fn push_section(body: &mut String, title: &str, updates: &Updates) {
    let _ = writeln!(body, "{title}:");
    for (key, value) in updates {
        let _ = writeln!(body, "{key}: {value}");
    }
}

/// An event as carried in a MESSAGE body, together with its author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReport {
    pub user: String,
    pub event: Event,
}

#[derive(Clone, Copy)]
enum Section {
    Header,
    General,
    TeamA,
    TeamB,
}

impl EventReport {
    /// Parses a SEND/MESSAGE body. Unknown lines are skipped and missing
    /// fields stay empty, so this never fails.
    pub fn parse(body: &str) -> Self {
        let mut user = String::new();
        let mut event = Event::default();
        let mut section = Section::Header;
        let mut rest = body;

        while !rest.is_empty() {
            let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
            rest = tail;
            let line = line.trim_end_matches('\r');
            let Some((key, value)) = split_field(line) else {
                continue;
            };

            match (key, value.is_empty()) {
                (GENERAL_SECTION, true) => section = Section::General,
                (TEAM_A_SECTION, true) => section = Section::TeamA,
                (TEAM_B_SECTION, true) => section = Section::TeamB,
                // Only the bare header starts the free text.
                (DESCRIPTION_SECTION, true) => {
                    event.description = rest.strip_suffix('\n').unwrap_or(rest).to_string();
                    break;
                }
                _ => match section {
                    Section::Header => match key {
                        "user" => user = value.to_string(),
                        "team a" => event.team_a_name = value.to_string(),
                        "team b" => event.team_b_name = value.to_string(),
                        "event name" => event.name = value.to_string(),
                        "time" => event.time = value.trim().parse().unwrap_or_default(),
                        _ => {}
                    },
                    Section::General => {
                        event.general.insert(key.to_string(), value.to_string());
                    }
                    Section::TeamA => {
                        event.team_a.insert(key.to_string(), value.to_string());
                    }
                    Section::TeamB => {
                        event.team_b.insert(key.to_string(), value.to_string());
                    }
                },
            }
        }

        Self { user, event }
    }
}

/// Splits `key: value` on the first colon, dropping one space after it.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let value = value.strip_prefix(' ').unwrap_or(value);
    Some((key.trim(), value))
}

/// Everything a `report` file contributes: both team names and the events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEvents {
    pub team_a: String,
    pub team_b: String,
    pub events: Vec<Event>,
}

#[derive(Deserialize)]
struct EventsFile {
    #[serde(rename = "team a")]
    team_a: String,
    #[serde(rename = "team b")]
    team_b: String,
    #[serde(default)]
    events: Vec<EventEntry>,
}

#[derive(Deserialize)]
struct EventEntry {
    #[serde(rename = "event name")]
    name: String,
    time: i64,
    #[serde(rename = "general game updates", default)]
    general: BTreeMap<String, Value>,
    #[serde(rename = "team a updates", default)]
    team_a: BTreeMap<String, Value>,
    #[serde(rename = "team b updates", default)]
    team_b: BTreeMap<String, Value>,
    #[serde(default)]
    description: String,
}

impl GameEvents {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ClientError::File {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&contents, path)
    }

    pub fn from_json(contents: &str, path: &Path) -> Result<Self, ClientError> {
        let file: EventsFile =
            serde_json::from_str(contents).map_err(|source| ClientError::EventFile {
                path: PathBuf::from(path),
                source,
            })?;

        let events = file
            .events
            .into_iter()
            .map(|entry| Event {
                team_a_name: file.team_a.clone(),
                team_b_name: file.team_b.clone(),
                name: entry.name,
                time: entry.time,
                general: stringify(entry.general),
                team_a: stringify(entry.team_a),
                team_b: stringify(entry.team_b),
                description: entry.description,
            })
            .collect();

        Ok(Self {
            team_a: file.team_a,
            team_b: file.team_b,
            events,
        })
    }

    pub fn game_name(&self) -> String {
        game_name(&self.team_a, &self.team_b)
    }
}

fn stringify(values: BTreeMap<String, Value>) -> Updates {
    values
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}
