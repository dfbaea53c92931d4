//! Mazu sync: keeps the in-RAM collections consistent with the service.
//!
//! `SyncStore` pulls bulk snapshots through a [`MazuApi`](mazu_api::MazuApi),
//! applies live push events from the hub channel and exposes the collections
//! and selections to readers. Event routing lives in [`dispatch`] as a pure
//! function of the event and the observed scope.

#![forbid(unsafe_code)]

pub mod dispatch;
mod store;

pub use dispatch::{Action, Mutation, ObservedScope};
pub use store::{ReadyState, SyncStore};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a bulk load is already in flight")]
    AlreadyLoading,
    #[error(transparent)]
    Api(#[from] mazu_api::ApiError),
}
