// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Graceful degradation across four service tiers.
//!
//! The agent serves every call at one of four levels, from the full model
//! stack down to handing the caller to a human. A streak of provider
//! failures steps the level down exactly one tier at a time; sustained
//! successes step it back up, but only when the providers the better tier
//! needs have closed breakers, and at most one recovery check per interval.
//! Operators can pin a level manually, which suppresses every automatic
//! transition until the override is cleared.
//!
//! One manager exists per process. Counters are atomics so call tasks never
//! block each other on the hot path; actual level transitions serialize
//! behind a single mutex.

pub mod breaker;

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::utils::now_stamp;

pub use breaker::{
    BreakerParams, BreakerState, CircuitBreaker, HealthSnapshot, ProviderHealth, ProviderKind,
};

// ---------------------------------------------------------------------------
// Service levels
// ---------------------------------------------------------------------------

/// The four service tiers, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLevel {
    FullAi,
    FastAi,
    RuleBased,
    HumanTransfer,
}

impl ServiceLevel {
    pub fn ordinal(self) -> u8 {
        match self {
            ServiceLevel::FullAi => 0,
            ServiceLevel::FastAi => 1,
            ServiceLevel::RuleBased => 2,
            ServiceLevel::HumanTransfer => 3,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => ServiceLevel::FullAi,
            1 => ServiceLevel::FastAi,
            2 => ServiceLevel::RuleBased,
            _ => ServiceLevel::HumanTransfer,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ServiceLevel::FullAi => "full_ai",
            ServiceLevel::FastAi => "fast_ai",
            ServiceLevel::RuleBased => "rule_based",
            ServiceLevel::HumanTransfer => "human_transfer",
        }
    }

    /// One tier worse, if any.
    pub fn degraded(self) -> Option<ServiceLevel> {
        match self {
            ServiceLevel::FullAi => Some(ServiceLevel::FastAi),
            ServiceLevel::FastAi => Some(ServiceLevel::RuleBased),
            ServiceLevel::RuleBased => Some(ServiceLevel::HumanTransfer),
            ServiceLevel::HumanTransfer => None,
        }
    }

    /// One tier better, if any.
    pub fn restored(self) -> Option<ServiceLevel> {
        match self {
            ServiceLevel::FullAi => None,
            ServiceLevel::FastAi => Some(ServiceLevel::FullAi),
            ServiceLevel::RuleBased => Some(ServiceLevel::FastAi),
            ServiceLevel::HumanTransfer => Some(ServiceLevel::RuleBased),
        }
    }

    /// The providers a call served at this tier will touch.
    pub fn providers(self) -> &'static [ProviderKind] {
        match self {
            ServiceLevel::FullAi | ServiceLevel::FastAi => {
                &[ProviderKind::Stt, ProviderKind::Llm, ProviderKind::Tts]
            }
            ServiceLevel::RuleBased => &[ProviderKind::Stt, ProviderKind::Tts],
            ServiceLevel::HumanTransfer => &[],
        }
    }
}

/// What one tier runs with: which models, and how long a turn may take.
#[derive(Debug, Clone, Serialize)]
pub struct LevelConfig {
    pub level: ServiceLevel,
    /// `None` means no generation at all; replies come from the script.
    pub llm_model: Option<String>,
    pub stt_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    /// Hard per-provider-call budget; a timeout counts as a failure.
    #[serde(skip)]
    pub reply_budget: Duration,
}

impl LevelConfig {
    /// The default ladder: premium models, cheaper/faster models, scripted
    /// replies, then human handoff.
    pub fn defaults() -> [LevelConfig; 4] {
        [
            LevelConfig {
                level: ServiceLevel::FullAi,
                llm_model: Some("gpt-4o".into()),
                stt_model: "nova-2".into(),
                tts_model: "tts-1-hd".into(),
                tts_voice: "alloy".into(),
                reply_budget: Duration::from_secs(6),
            },
            LevelConfig {
                level: ServiceLevel::FastAi,
                llm_model: Some("gpt-4o-mini".into()),
                stt_model: "nova-2".into(),
                tts_model: "tts-1".into(),
                tts_voice: "alloy".into(),
                reply_budget: Duration::from_secs(3),
            },
            LevelConfig {
                level: ServiceLevel::RuleBased,
                llm_model: None,
                stt_model: "base".into(),
                tts_model: "tts-1".into(),
                tts_voice: "alloy".into(),
                reply_budget: Duration::from_secs(2),
            },
            LevelConfig {
                level: ServiceLevel::HumanTransfer,
                llm_model: None,
                stt_model: "base".into(),
                tts_model: "tts-1".into(),
                tts_voice: "alloy".into(),
                reply_budget: Duration::from_secs(2),
            },
        ]
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Streak thresholds and recovery pacing.
#[derive(Debug, Clone)]
pub struct DegradationParams {
    /// Consecutive failures that trigger one downward step.
    pub degrade_after: u32,
    /// Consecutive successes required before a recovery check can pass.
    pub recover_after: u32,
    /// Minimum gap between recovery checks.
    pub recovery_interval: Duration,
    pub breaker: BreakerParams,
}

impl Default for DegradationParams {
    fn default() -> Self {
        Self {
            degrade_after: 3,
            recover_after: 5,
            recovery_interval: Duration::from_secs(30),
            breaker: BreakerParams::default(),
        }
    }
}

#[derive(Debug)]
struct Transitions {
    level: ServiceLevel,
    reason: String,
    since: String,
    manual_override: bool,
    last_recovery_check: Option<Instant>,
}

/// Serializable view of the manager for the health endpoint and logs.
#[derive(Debug, Clone, Serialize)]
pub struct DegradationSnapshot {
    pub level: ServiceLevel,
    pub reason: String,
    pub since: String,
    pub manual_override: bool,
    pub failure_streak: u32,
    pub success_streak: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Calls recorded while each tier was active, best tier first.
    pub calls_at_level: [u64; 4],
    pub level_changes: u64,
    pub breakers: HealthSnapshot,
}

/// Process-wide degradation state machine.
#[derive(Debug)]
pub struct DegradationManager {
    params: DegradationParams,
    configs: [LevelConfig; 4],
    health: ProviderHealth,

    /// Mirror of `Transitions::level` for lock-free reads.
    current: AtomicU8,
    failure_streak: AtomicU32,
    success_streak: AtomicU32,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    calls_at_level: [AtomicU64; 4],
    level_changes: AtomicU64,

    inner: Mutex<Transitions>,
}

impl DegradationManager {
    pub fn new(params: DegradationParams) -> Self {
        let health = ProviderHealth::new(params.breaker.clone());
        Self {
            params,
            configs: LevelConfig::defaults(),
            health,
            current: AtomicU8::new(ServiceLevel::FullAi.ordinal()),
            failure_streak: AtomicU32::new(0),
            success_streak: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            calls_at_level: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            level_changes: AtomicU64::new(0),
            inner: Mutex::new(Transitions {
                level: ServiceLevel::FullAi,
                reason: "startup".into(),
                since: now_stamp(),
                manual_override: false,
                last_recovery_check: None,
            }),
        }
    }

    pub fn with_level_configs(mut self, configs: [LevelConfig; 4]) -> Self {
        self.configs = configs;
        self
    }

    /// The tier new work should be served at.
    pub fn level(&self) -> ServiceLevel {
        ServiceLevel::from_ordinal(self.current.load(Ordering::SeqCst))
    }

    pub fn config_for(&self, level: ServiceLevel) -> &LevelConfig {
        &self.configs[level.ordinal() as usize]
    }

    pub fn health(&self) -> &ProviderHealth {
        &self.health
    }

    /// A provider call succeeded.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::SeqCst);
        self.calls_at_level[self.level().ordinal() as usize].fetch_add(1, Ordering::SeqCst);
        self.failure_streak.store(0, Ordering::SeqCst);
        let streak = self.success_streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.params.recover_after {
            self.maybe_recover();
        }
    }

    /// A provider call failed or timed out.
    pub fn record_failure(&self, reason: &str) {
        self.total_failures.fetch_add(1, Ordering::SeqCst);
        self.calls_at_level[self.level().ordinal() as usize].fetch_add(1, Ordering::SeqCst);
        self.success_streak.store(0, Ordering::SeqCst);
        let streak = self.failure_streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.params.degrade_after {
            self.degrade(reason);
        }
    }

    /// Outcome bookkeeping that also feeds the provider's breaker.
    pub fn record_provider_success(&self, kind: ProviderKind) {
        self.health.breaker(kind).record_success();
        self.record_success();
    }

    pub fn record_provider_failure(&self, kind: ProviderKind, reason: &str) {
        self.health.breaker(kind).record_failure();
        self.record_failure(reason);
    }

    fn degrade(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.manual_override {
            tracing::debug!(reason, "degradation suppressed by manual override");
            return;
        }
        let Some(target) = inner.level.degraded() else {
            // Already at the floor. Consume the streak so the counter does
            // not grow without bound.
            self.failure_streak.store(0, Ordering::SeqCst);
            return;
        };
        // Consume the streak; a concurrent degrade may have beaten us here.
        if self.failure_streak.swap(0, Ordering::SeqCst) < self.params.degrade_after {
            return;
        }
        let from = inner.level;
        inner.level = target;
        inner.reason = reason.to_string();
        inner.since = now_stamp();
        self.current.store(target.ordinal(), Ordering::SeqCst);
        self.success_streak.store(0, Ordering::SeqCst);
        self.level_changes.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            from = from.label(),
            to = target.label(),
            reason,
            "service level degraded"
        );
    }

    fn maybe_recover(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.manual_override {
            return;
        }
        let Some(target) = inner.level.restored() else {
            return;
        };
        // Re-check under the lock; a transition may have reset the streak.
        if self.success_streak.load(Ordering::SeqCst) < self.params.recover_after {
            return;
        }
        if let Some(last) = inner.last_recovery_check {
            if last.elapsed() < self.params.recovery_interval {
                return;
            }
        }
        inner.last_recovery_check = Some(Instant::now());
        if !self.health.all_closed(target.providers()) {
            tracing::info!(
                target = target.label(),
                "recovery blocked: target tier has open breakers"
            );
            return;
        }
        let from = inner.level;
        inner.level = target;
        inner.reason = "sustained successes".into();
        inner.since = now_stamp();
        self.current.store(target.ordinal(), Ordering::SeqCst);
        self.failure_streak.store(0, Ordering::SeqCst);
        self.success_streak.store(0, Ordering::SeqCst);
        self.level_changes.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            from = from.label(),
            to = target.label(),
            "service level recovered"
        );
    }

    /// Pin the level. With `manual` set, automatic transitions stay
    /// suppressed until [`clear_override`](Self::clear_override).
    pub fn set_level(&self, level: ServiceLevel, manual: bool, reason: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let changed = inner.level != level;
        inner.level = level;
        inner.manual_override = manual;
        inner.reason = reason.to_string();
        inner.since = now_stamp();
        inner.last_recovery_check = None;
        self.current.store(level.ordinal(), Ordering::SeqCst);
        self.failure_streak.store(0, Ordering::SeqCst);
        self.success_streak.store(0, Ordering::SeqCst);
        if changed {
            self.level_changes.fetch_add(1, Ordering::SeqCst);
        }
        tracing::info!(level = level.label(), manual, reason, "service level set");
    }

    /// Lift a manual override and start observing streaks afresh.
    pub fn clear_override(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.manual_override = false;
        self.failure_streak.store(0, Ordering::SeqCst);
        self.success_streak.store(0, Ordering::SeqCst);
        tracing::info!(level = inner.level.label(), "manual override cleared");
    }

    pub fn snapshot(&self) -> DegradationSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        DegradationSnapshot {
            level: inner.level,
            reason: inner.reason.clone(),
            since: inner.since.clone(),
            manual_override: inner.manual_override,
            failure_streak: self.failure_streak.load(Ordering::SeqCst),
            success_streak: self.success_streak.load(Ordering::SeqCst),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            total_successes: self.total_successes.load(Ordering::SeqCst),
            calls_at_level: [
                self.calls_at_level[0].load(Ordering::SeqCst),
                self.calls_at_level[1].load(Ordering::SeqCst),
                self.calls_at_level[2].load(Ordering::SeqCst),
                self.calls_at_level[3].load(Ordering::SeqCst),
            ],
            level_changes: self.level_changes.load(Ordering::SeqCst),
            breakers: self.health.snapshot(),
        }
    }
}

impl Default for DegradationManager {
    fn default() -> Self {
        Self::new(DegradationParams::default())
    }
}
