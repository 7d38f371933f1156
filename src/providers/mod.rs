// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Fiat payment processor integrations.

pub mod onramp;

pub use onramp::{
    await_terminal, HostedOnrampClient, OnrampOutcome, OnrampProvider, OnrampSession, OnrampStatus,
};
