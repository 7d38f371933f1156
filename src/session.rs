// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Funding session registry: at most one active session per user.
//!
//! Supersession is explicit rather than implied by task cancellation: each
//! session carries a generation number and a `CancellationToken`. Starting
//! a new session cancels the previous token and bumps the generation; any
//! work completing for a stale generation discards its result instead of
//! mutating shared state. The recovery manager uses the same registry for
//! mutual exclusion with user-initiated funding.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{FundingSession, FundingStatus, Vendor};

struct ActiveSession {
    generation: u64,
    cancel: CancellationToken,
    session: FundingSession,
}

/// Handle to one funding session generation.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub generation: u64,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Option<ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the registry, recovering the guard if a panicking holder left
    /// the mutex poisoned. Session state stays consistent across each
    /// critical section, so a poisoned guard is still usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a new session over `guard`, superseding any active one. The
    /// superseded session's token is cancelled so its in-flight work
    /// unwinds.
    fn install(
        guard: &mut Option<ActiveSession>,
        vendor: Vendor,
        desired_stablecoin_minor: u64,
    ) -> SessionHandle {
        let next_generation = guard.as_ref().map(|s| s.generation + 1).unwrap_or(1);
        if let Some(prior) = guard.as_ref() {
            if !prior.session.status.is_terminal() {
                debug!(
                    superseded_generation = prior.generation,
                    "superseding active funding session"
                );
            }
            prior.cancel.cancel();
        }
        let cancel = CancellationToken::new();
        *guard = Some(ActiveSession {
            generation: next_generation,
            cancel: cancel.clone(),
            session: FundingSession {
                vendor,
                status: FundingStatus::Start,
                desired_stablecoin_minor,
            },
        });
        SessionHandle {
            generation: next_generation,
            cancel,
        }
    }

    /// Begin a new session, superseding any active one.
    pub fn begin(&self, vendor: Vendor, desired_stablecoin_minor: u64) -> SessionHandle {
        let mut guard = self.lock();
        Self::install(&mut guard, vendor, desired_stablecoin_minor)
    }

    /// Begin a session only if no non-terminal session is active. Used by
    /// the recovery manager, which must never run concurrently with a
    /// user-initiated funding attempt. The idle check and the installation
    /// happen under one held lock, so a user purchase can never slip in
    /// between them and be superseded by recovery.
    pub fn try_begin_if_idle(
        &self,
        vendor: Vendor,
        desired_stablecoin_minor: u64,
    ) -> Option<SessionHandle> {
        let mut guard = self.lock();
        if let Some(active) = guard.as_ref() {
            if !active.session.status.is_terminal() {
                return None;
            }
        }
        Some(Self::install(&mut guard, vendor, desired_stablecoin_minor))
    }

    /// Whether `generation` is still the active session.
    pub fn is_current(&self, generation: u64) -> bool {
        let guard = self.lock();
        guard.as_ref().is_some_and(|s| s.generation == generation)
    }

    /// Update the session status. Returns false (and changes nothing) for a
    /// stale generation.
    pub fn set_status(&self, generation: u64, status: FundingStatus) -> bool {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(active) if active.generation == generation => {
                active.session.status = status;
                true
            }
            _ => false,
        }
    }

    /// Cancel the active session's in-flight work without replacing it.
    /// This is the host's signal that the user closed the payment UI.
    pub fn cancel_active(&self) {
        let guard = self.lock();
        if let Some(active) = guard.as_ref() {
            active.cancel.cancel();
        }
    }

    /// Current session snapshot, if any.
    pub fn snapshot(&self) -> Option<FundingSession> {
        let guard = self.lock();
        guard.as_ref().map(|s| s.session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_assigns_increasing_generations() {
        let registry = SessionRegistry::new();
        let first = registry.begin(Vendor::Stripe, 100);
        let second = registry.begin(Vendor::Stripe, 200);
        assert!(second.generation > first.generation);
        assert!(registry.is_current(second.generation));
        assert!(!registry.is_current(first.generation));
    }

    #[test]
    fn cancel_active_fires_the_session_token() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Vendor::Stripe, 100);
        registry.cancel_active();
        assert!(handle.cancel.is_cancelled());
        // The session itself is still the current one.
        assert!(registry.is_current(handle.generation));
    }

    #[test]
    fn superseded_session_token_is_cancelled() {
        let registry = SessionRegistry::new();
        let first = registry.begin(Vendor::Stripe, 100);
        assert!(!first.cancel.is_cancelled());
        let _second = registry.begin(Vendor::Coinflow, 200);
        assert!(first.cancel.is_cancelled());
    }

    #[test]
    fn stale_generation_cannot_mutate_state() {
        let registry = SessionRegistry::new();
        let first = registry.begin(Vendor::Stripe, 100);
        let _second = registry.begin(Vendor::Stripe, 200);

        // Late-arriving signal from the superseded session is discarded.
        assert!(!registry.set_status(first.generation, FundingStatus::Finished));
        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.status, FundingStatus::Start);
        assert_eq!(snapshot.desired_stablecoin_minor, 200);
    }

    #[test]
    fn recovery_cannot_start_while_session_active() {
        let registry = SessionRegistry::new();
        let active = registry.begin(Vendor::Stripe, 100);
        registry.set_status(active.generation, FundingStatus::Funding);
        assert!(registry.try_begin_if_idle(Vendor::Stripe, 100).is_none());

        registry.set_status(active.generation, FundingStatus::Finished);
        assert!(registry.try_begin_if_idle(Vendor::Stripe, 100).is_some());
    }

    #[test]
    fn recovery_never_supersedes_a_racing_user_session() {
        use std::sync::Arc;

        // A user purchase that begins while recovery is checking for
        // idleness must win: recovery either sees it and backs off, or
        // installed first and gets superseded. The user's token is never
        // the one cancelled by recovery.
        for _ in 0..200 {
            let registry = Arc::new(SessionRegistry::new());
            let user_registry = Arc::clone(&registry);
            let user = std::thread::spawn(move || user_registry.begin(Vendor::Stripe, 100));
            let recovery = registry.try_begin_if_idle(Vendor::Stripe, 100);
            let user_handle = user.join().unwrap();

            assert!(!user_handle.cancel.is_cancelled());
            assert!(registry.is_current(user_handle.generation));
            if let Some(recovery_handle) = recovery {
                // Recovery ran first on an idle registry and was then
                // superseded by the user session.
                assert!(recovery_handle.cancel.is_cancelled());
                assert!(recovery_handle.generation < user_handle.generation);
            }
        }
    }

    #[test]
    fn registry_starts_idle() {
        let registry = SessionRegistry::new();
        assert!(registry.snapshot().is_none());
        assert!(registry.try_begin_if_idle(Vendor::Coinflow, 50).is_some());
    }
}
