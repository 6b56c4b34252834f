// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-provider circuit breakers.
//!
//! Every STT/LLM/TTS call reports its outcome here. A run of consecutive
//! failures opens the provider's breaker; after a cooldown one probe call
//! is let through (half-open), and its outcome either closes the breaker or
//! re-opens it for another cooldown. The degradation manager refuses to
//! recover to a level whose providers are not all closed.
//!
//! Lock-free: state is a pair of atomics plus a single-probe gate, safe to
//! consult from every concurrent call task.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// The three swappable speech/language providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Stt,
    Llm,
    Tts,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::Stt => "stt",
            ProviderKind::Llm => "llm",
            ProviderKind::Tts => "tts",
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker tuning shared by all providers.
#[derive(Debug, Clone)]
pub struct BreakerParams {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before offering a probe.
    pub cooldown: Duration,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker for one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    kind: ProviderKind,
    params: BreakerParams,
    open: AtomicBool,
    consecutive_failures: AtomicU32,
    /// Milliseconds since `epoch` at which the cooldown ends.
    retry_at_ms: AtomicU64,
    /// Lets exactly one caller probe while half-open.
    probe_in_flight: AtomicBool,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(kind: ProviderKind, params: BreakerParams) -> Self {
        Self {
            kind,
            params,
            open: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            retry_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        let millis = self.epoch.elapsed().as_millis();
        if millis > u128::from(u64::MAX) {
            u64::MAX
        } else {
            millis as u64
        }
    }

    /// May this call go to the provider right now?
    ///
    /// Closed: always. Open: only once the cooldown has elapsed, and then
    /// only for the single caller that wins the probe slot.
    pub fn allow_attempt(&self) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return true;
        }
        if self.now_ms() < self.retry_at_ms.load(Ordering::SeqCst) {
            return false;
        }
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// The provider answered: close fully.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::info!(provider = self.kind.label(), "circuit breaker closed");
        }
    }

    /// The provider failed: count it, and open (or re-open) at the
    /// threshold with a fresh cooldown.
    pub fn record_failure(&self) {
        self.probe_in_flight.store(false, Ordering::SeqCst);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let was_open = self.open.load(Ordering::SeqCst);
        if failures >= self.params.failure_threshold || was_open {
            let cooldown_ms = self.params.cooldown.as_millis().min(u128::from(u64::MAX)) as u64;
            self.retry_at_ms
                .store(self.now_ms().saturating_add(cooldown_ms), Ordering::SeqCst);
            if !self.open.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    provider = self.kind.label(),
                    failures,
                    cooldown_s = self.params.cooldown.as_secs(),
                    "circuit breaker opened"
                );
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BreakerState {
        if !self.open.load(Ordering::SeqCst) {
            BreakerState::Closed
        } else if self.now_ms() >= self.retry_at_ms.load(Ordering::SeqCst) {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }
}

// ---------------------------------------------------------------------------
// Provider health registry
// ---------------------------------------------------------------------------

/// One breaker per provider, shared process-wide.
#[derive(Debug)]
pub struct ProviderHealth {
    stt: CircuitBreaker,
    llm: CircuitBreaker,
    tts: CircuitBreaker,
}

/// Breaker states for the health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub stt: BreakerState,
    pub llm: BreakerState,
    pub tts: BreakerState,
}

impl ProviderHealth {
    pub fn new(params: BreakerParams) -> Self {
        Self {
            stt: CircuitBreaker::new(ProviderKind::Stt, params.clone()),
            llm: CircuitBreaker::new(ProviderKind::Llm, params.clone()),
            tts: CircuitBreaker::new(ProviderKind::Tts, params),
        }
    }

    pub fn breaker(&self, kind: ProviderKind) -> &CircuitBreaker {
        match kind {
            ProviderKind::Stt => &self.stt,
            ProviderKind::Llm => &self.llm,
            ProviderKind::Tts => &self.tts,
        }
    }

    /// Are all of these providers' breakers closed?
    pub fn all_closed(&self, kinds: &[ProviderKind]) -> bool {
        kinds.iter().all(|&kind| self.breaker(kind).is_closed())
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            stt: self.stt.state(),
            llm: self.llm.state(),
            tts: self.tts.state(),
        }
    }
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self::new(BreakerParams::default())
    }
}
