// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tern-store: the cluster object store as consumed by the reconciler.
//!
//! The engine never talks to a concrete cluster; it goes through the
//! client traits here. `FakeCluster` is the in-memory implementation used
//! by every test, with resource versions and fault injection.

pub mod client;
pub mod error;
pub mod events;
pub mod memory;
pub mod resolution;

pub use client::{ChildClient, Cluster, DefinitionClient, RunClient, VolumeClient};
pub use error::StoreError;
pub use events::{CloudEventSink, ClusterEvent, EventKind, EventSink};
pub use memory::FakeCluster;
pub use resolution::{ResolutionRequest, ResolutionStatus, ResolverClient};
