// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tern-reconciler: drives pipeline runs to completion.
//!
//! One reconcile pass loads a run snapshot, resolves definitions,
//! evaluates the graph against the children that already exist, issues
//! creates and patches, and writes back a synthesized status. Every pass
//! is idempotent: replaying it against an unchanged snapshot does
//! nothing.

pub mod cancel;
pub mod error;
pub mod events;
pub mod expr;
pub mod flags;
pub mod graph;
pub mod matrix;
pub mod reconciler;
pub mod resolved;
pub mod status;
pub mod volumes;
pub mod when;

pub use error::{Outcome, ReconcileError};
pub use flags::{ApiFields, EmbeddedStatus, FlagSource, Flags};
pub use reconciler::Reconciler;
