//! Mazu core types: entity records, the `Entity` trait and push events.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::hash::Hash;

pub mod events;
pub mod models;
#[cfg(any(test, feature = "testing"))]
pub mod fixtures;

pub use events::{ContainerExecs, ErrorFrame, JobsChanged, PushEvent, RoundJobsReady};
pub use models::*;

/// A record held in a keyed collection.
///
/// The store never looks inside a record beyond its id; `inherit` is the one
/// hook that lets client-only state survive a server-side replacement.
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;

    /// Called by upsert when `self` replaces `previous` in place.
    fn inherit(&mut self, _previous: &Self) {}
}

macro_rules! int_entity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Entity for $ty {
                type Id = i32;
                fn id(&self) -> i32 { self.id }
            }
        )*
    };
}

int_entity!(Challenge, Team, Exploit, ExploitRun, ExploitJob, Flag, ChallengeTeamRelation);

impl Entity for Round {
    type Id = i32;

    fn id(&self) -> i32 { self.id }

    fn inherit(&mut self, previous: &Self) {
        if self.jobs_ready.is_none() {
            self.jobs_ready = previous.jobs_ready;
        }
    }
}

impl Entity for Setting {
    type Id = String;
    fn id(&self) -> String { self.key.clone() }
}

impl Entity for ContainerInfo {
    type Id = String;
    fn id(&self) -> String { self.id.clone() }
}

impl Entity for WsConnection {
    type Id = String;
    fn id(&self) -> String { self.id.clone() }
}

pub mod prelude {
    pub use super::{Entity, PushEvent};
    pub use super::models::{Challenge, ContainerInfo, Exploit, ExploitJob, ExploitRun, Flag, Round, Setting, Team, WsConnection};
}
