// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Durable local storage for purchase recovery state.

mod recovery_store;

pub use recovery_store::{RecoveryStore, StoreError, StoreResult};
