//! Mazu store: keyed entity collections and selection state.
//!
//! Readers load an immutable snapshot without locking; writers go through the
//! three collection operations and publish a new snapshot plus an epoch tick.

#![forbid(unsafe_code)]

mod collection;
mod runners;
pub mod selection;

pub use collection::{Collection, CollectionSnapshot, InsertAt};
pub use runners::ContainerRunners;
pub use selection::{
    is_valid_id, pick_default_round, resolve_board_selection, resolve_flag_selection,
    resolve_round_selection, SelectionChange, Selections,
};
