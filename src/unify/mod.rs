//! Identity-graph unifier.
//!
//! Per-source records that link to each other (directly, through incoming links, or
//! through a shared weak value such as a social handle) describe the same real-world
//! entity and end up pointing at one canonical id. Canonical ids are merge-only: a
//! component holding two different ids is a conflict and is never resolved here.

pub mod children;
mod entity;
mod task;
mod walker;

pub use entity::{unify, UnifyError, UnifyOutcome};
pub use task::UnifyTask;
pub use walker::{component, UnifyScope};
