//! Subscription and receipt bookkeeping for one session.
//!
//! Both registries hand out identifiers from their own counter starting at
//! 1. Identifiers are never reused, even after the entry is removed.

use std::{collections::HashMap, fmt};

pub type SubscriptionId = u64;
pub type ReceiptId = u64;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: SubscriptionId,
    by_game: HashMap<String, SubscriptionId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a subscription for `game` under a fresh identifier.
    pub fn subscribe(&mut self, game: &str) -> SubscriptionId {
        self.next_id += 1;
        self.by_game.insert(game.to_string(), self.next_id);
        self.next_id
    }

    pub fn unsubscribe(&mut self, game: &str) -> Option<SubscriptionId> {
        self.by_game.remove(game)
    }

    pub fn is_subscribed(&self, game: &str) -> bool {
        self.by_game.contains_key(game)
    }
}

/// What the client asked for when it attached a receipt to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    Joined { game: String },
    Exited { game: String },
    Disconnect,
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingAction::Joined { game } => write!(f, "Joined channel {game}"),
            PendingAction::Exited { game } => write!(f, "Exited channel {game}"),
            PendingAction::Disconnect => f.write_str("Disconnected"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReceiptLedger {
    next_id: ReceiptId,
    pending: HashMap<ReceiptId, PendingAction>,
}

impl ReceiptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: PendingAction) -> ReceiptId {
        self.next_id += 1;
        self.pending.insert(self.next_id, action);
        self.next_id
    }

    /// Removes and returns the action waiting on `id`, if any.
    pub fn resolve(&mut self, id: ReceiptId) -> Option<PendingAction> {
        self.pending.remove(&id)
    }

    pub fn awaits(&self, action: &PendingAction) -> bool {
        self.pending.values().any(|pending| pending == action)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn last_issued(&self) -> Option<ReceiptId> {
        (self.next_id > 0).then_some(self.next_id)
    }
}
