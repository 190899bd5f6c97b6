//! The presentation adapter around the core tree.
//!
//! Background tasks mutate the tree and report through an [`proxy::EventProxy`];
//! a single consumer receives `UserEvent`s and renders from `UiState` snapshots.

pub mod events;
pub mod helpers;
pub mod proxy;
pub mod state;
pub mod tasks;
pub mod view_model;
