//! Policy Engine package (C6, C7, C8).
//!
//! Mirrors the teacher's `policy/` module split: types shared by both
//! stores, a static file-backed loader, a dynamic per-AE declaration
//! store, and an engine that merges the two into decisions over an
//! atomically-swapped snapshot.

pub mod dynamic;
pub mod engine;
pub mod static_loader;
pub mod types;

pub use engine::{Decision, PolicyEngine};
pub use types::{Direction, EffectivePolicy};
