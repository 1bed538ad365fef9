//! Match summaries built from one user's event history.

use std::{fmt, path::Path};

use crate::{
    error::ClientError,
    event::{Event, Updates},
    ledger::order_events,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub time: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub team_a: String,
    pub team_b: String,
    pub general: Updates,
    pub team_a_stats: Updates,
    pub team_b_stats: Updates,
    pub reports: Vec<ReportEntry>,
}

impl Summary {
    /// Folds `events` in halftime order. Later updates overwrite earlier
    /// ones. Returns `None` for an empty history.
    pub fn aggregate(events: &[Event]) -> Option<Self> {
        let ordered = order_events(events.to_vec());
        let first = ordered.first()?;

        let mut summary = Summary {
            team_a: first.team_a_name.clone(),
            team_b: first.team_b_name.clone(),
            general: Updates::new(),
            team_a_stats: Updates::new(),
            team_b_stats: Updates::new(),
            reports: Vec::with_capacity(ordered.len()),
        };

        for event in ordered {
            summary.general.extend(event.general);
            summary.team_a_stats.extend(event.team_a);
            summary.team_b_stats.extend(event.team_b);
            summary.reports.push(ReportEntry {
                time: event.time,
                name: event.name,
                description: event.description,
            });
        }

        Some(summary)
    }

    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref();
        tokio::fs::write(path, self.to_string())
            .await
            .map_err(|source| ClientError::File {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn write_stats(f: &mut fmt::Formatter<'_>, title: &str, stats: &Updates) -> fmt::Result {
    writeln!(f, "{title} stats:")?;
    for (key, value) in stats {
        writeln!(f, "{key}: {value}")?;
    }
    Ok(())
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} vs {}", self.team_a, self.team_b)?;
        writeln!(f, "Game stats:")?;
        write_stats(f, "General", &self.general)?;
        write_stats(f, &self.team_a, &self.team_a_stats)?;
        write_stats(f, &self.team_b, &self.team_b_stats)?;
        writeln!(f, "Game event reports:")?;
        for report in &self.reports {
            writeln!(f, "{} - {}:", report.time, report.name)?;
            writeln!(f)?;
            writeln!(f, "{}", report.description)?;
            writeln!(f)?;
        }
        Ok(())
    }
}
