//! Per-game, per-user event history.
//!
//! Every history is kept in halftime order: first-half events by time, then
//! second-half events by time. Ties keep their arrival order.

use std::collections::BTreeMap;

use crate::event::Event;

/// Last second of regulation first half (51 minutes, stoppage included).
pub const HALFTIME_SECONDS: i64 = 3060;

const BEFORE_HALFTIME_KEY: &str = "before halftime";

/// An explicit `before halftime: false` always wins; otherwise the clock decides.
pub fn is_before_halftime(event: &Event) -> bool {
    if event.general.get(BEFORE_HALFTIME_KEY).map(String::as_str) == Some("false") {
        return false;
    }
    event.time <= HALFTIME_SECONDS
}

/// Sorts events into halftime order.
pub fn order_events(events: Vec<Event>) -> Vec<Event> {
    let (mut first_half, mut second_half): (Vec<_>, Vec<_>) =
        events.into_iter().partition(is_before_halftime);
    // `sort_by_key` is stable, so equal times keep their relative order.
    first_half.sort_by_key(|event| event.time);
    second_half.sort_by_key(|event| event.time);
    first_half.extend(second_half);
    first_half
}

#[derive(Debug, Default)]
pub struct EventLedger {
    games: BTreeMap<String, BTreeMap<String, Vec<Event>>>,
}

impl EventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, game: &str, user: &str, event: Event) {
        self.extend(game, user, std::iter::once(event));
    }

    pub fn extend(&mut self, game: &str, user: &str, events: impl IntoIterator<Item = Event>) {
        let history = self
            .games
            .entry(game.to_string())
            .or_default()
            .entry(user.to_string())
            .or_default();
        let mut merged = std::mem::take(history);
        merged.extend(events);
        *history = order_events(merged);
    }

    /// Events `user` reported for `game`, in halftime order.
    pub fn history(&self, game: &str, user: &str) -> Option<&[Event]> {
        self.games
            .get(game)
            .and_then(|users| users.get(user))
            .map(Vec::as_slice)
            .filter(|events| !events.is_empty())
    }
}
