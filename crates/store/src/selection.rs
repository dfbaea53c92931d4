//! Selection resolution: keep each focused id pointing at a live record.
//!
//! The `resolve_*` functions are pure; `Selections` holds the current values
//! and applies the same rules in `ensure` after structural changes.

use mazu_core::{Challenge, Entity, Round};
use tokio::sync::watch;

/// True iff `id` is set and some record carries it.
pub fn is_valid_id<T: Entity>(items: &[T], id: Option<&T::Id>) -> bool {
    match id {
        Some(id) => items.iter().any(|it| &it.id() == id),
        None => false,
    }
}

/// First non-pending round, else the first round, else `None`.
pub fn pick_default_round(rounds: &[Round]) -> Option<i32> {
    rounds.iter().find(|r| !r.is_pending()).or_else(|| rounds.first()).map(|r| r.id)
}

/// Requested id if valid, else the held one if still valid, else the first record.
pub fn resolve_board_selection<T: Entity>(items: &[T], selected: Option<T::Id>, requested: Option<T::Id>) -> Option<T::Id> {
    if is_valid_id(items, requested.as_ref()) {
        return requested;
    }
    if is_valid_id(items, selected.as_ref()) {
        return selected;
    }
    items.first().map(Entity::id)
}

/// Like `resolve_board_selection` but the fallback is `pick_default_round`.
pub fn resolve_round_selection(rounds: &[Round], selected: Option<i32>, requested: Option<i32>) -> Option<i32> {
    if is_valid_id(rounds, requested.as_ref()) {
        return requested;
    }
    if is_valid_id(rounds, selected.as_ref()) {
        return selected;
    }
    pick_default_round(rounds)
}

/// A flag filter has no default: an invalid request clears it.
pub fn resolve_flag_selection(rounds: &[Round], requested: Option<i32>) -> Option<i32> {
    if is_valid_id(rounds, requested.as_ref()) { requested } else { None }
}

/// Which selections `ensure` had to repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionChange {
    pub challenge: bool,
    pub round: bool,
    pub flag_round: bool,
}

impl SelectionChange {
    pub fn any(&self) -> bool { self.challenge || self.round || self.flag_round }
}

/// Focused ids per UI dimension, each observable through a watch channel.
pub struct Selections {
    challenge: watch::Sender<Option<i32>>,
    round: watch::Sender<Option<i32>>,
    flag_round: watch::Sender<Option<i32>>,
}

impl Default for Selections {
    fn default() -> Self { Self::new() }
}

impl Selections {
    pub fn new() -> Self {
        Self {
            challenge: watch::channel(None).0,
            round: watch::channel(None).0,
            flag_round: watch::channel(None).0,
        }
    }

    pub fn challenge(&self) -> Option<i32> { *self.challenge.borrow() }
    pub fn round(&self) -> Option<i32> { *self.round.borrow() }
    pub fn flag_round(&self) -> Option<i32> { *self.flag_round.borrow() }

    pub fn set_challenge(&self, id: Option<i32>) -> bool { set_if_changed(&self.challenge, id) }
    pub fn set_round(&self, id: Option<i32>) -> bool { set_if_changed(&self.round, id) }
    pub fn set_flag_round(&self, id: Option<i32>) -> bool { set_if_changed(&self.flag_round, id) }

    pub fn subscribe_challenge(&self) -> watch::Receiver<Option<i32>> { self.challenge.subscribe() }
    pub fn subscribe_round(&self) -> watch::Receiver<Option<i32>> { self.round.subscribe() }
    pub fn subscribe_flag_round(&self) -> watch::Receiver<Option<i32>> { self.flag_round.subscribe() }

    /// Repair every selection that no longer points at a record.
    pub fn ensure(&self, challenges: &[Challenge], rounds: &[Round]) -> SelectionChange {
        let mut change = SelectionChange::default();
        let current = self.challenge();
        if !is_valid_id(challenges, current.as_ref()) {
            change.challenge = self.set_challenge(challenges.first().map(|c| c.id));
        }
        let current = self.round();
        if !is_valid_id(rounds, current.as_ref()) {
            change.round = self.set_round(pick_default_round(rounds));
        }
        let current = self.flag_round();
        if current.is_some() && !is_valid_id(rounds, current.as_ref()) {
            change.flag_round = self.set_flag_round(None);
        }
        change
    }

    pub fn clear(&self) {
        self.set_challenge(None);
        self.set_round(None);
        self.set_flag_round(None);
    }
}

fn set_if_changed(tx: &watch::Sender<Option<i32>>, id: Option<i32>) -> bool {
    tx.send_if_modified(|cur| {
        if *cur == id {
            false
        } else {
            *cur = id;
            true
        }
    })
}
