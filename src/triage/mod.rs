// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Deterministic emergency triage over caller utterances.
//!
//! Safety-critical classification never waits on a model: the classifier is
//! a pure function over weighted phrase tables, so the same words always
//! produce the same verdict and the phrase list is reviewable line by line.
//! Confidence accumulates across matched phrases (several weak signals can
//! add up to a strong one) and is capped at 1.0. Verdicts below the
//! acceptance threshold are advisory: they ride along in logs and state but
//! never force a transfer on their own.
//!
//! The same module owns the frustration phrase check the agent uses to
//! track caller temperature.

use serde::Serialize;

/// Emergency categories the triage tables know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyCategory {
    GasLeak,
    Fire,
    CarbonMonoxide,
    NoHeat,
    WaterFailure,
    Unspecified,
}

impl EmergencyCategory {
    /// Stable snake_case label for state fields and logs.
    pub fn label(self) -> &'static str {
        match self {
            EmergencyCategory::GasLeak => "gas_leak",
            EmergencyCategory::Fire => "fire",
            EmergencyCategory::CarbonMonoxide => "carbon_monoxide",
            EmergencyCategory::NoHeat => "no_heat",
            EmergencyCategory::WaterFailure => "water_failure",
            EmergencyCategory::Unspecified => "unspecified",
        }
    }
}

/// Outcome of classifying one utterance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyVerdict {
    /// Did confidence reach the acceptance threshold?
    pub is_emergency: bool,
    /// Best-scoring category; `Unspecified` when nothing matched.
    pub category: EmergencyCategory,
    /// Accumulated phrase weight, capped at 1.0.
    pub confidence: f32,
}

impl EmergencyVerdict {
    fn none() -> Self {
        Self {
            is_emergency: false,
            category: EmergencyCategory::Unspecified,
            confidence: 0.0,
        }
    }
}

// Phrase tables. Weights are tuned so the life-safety categories clear the
// 0.8 default threshold from one strong phrase plus an urgency booster,
// while comfort failures need a vulnerability signal on top.
const GAS_PHRASES: &[(&str, f32)] = &[
    ("gas leak", 0.6),
    ("smell gas", 0.6),
    ("gas smell", 0.6),
    ("smells like gas", 0.6),
    ("smell of gas", 0.6),
    ("rotten egg", 0.5),
    ("hissing sound", 0.3),
];

const FIRE_PHRASES: &[(&str, f32)] = &[
    ("on fire", 0.7),
    ("caught fire", 0.7),
    ("flames", 0.7),
    ("burning smell", 0.5),
    ("smell of burning", 0.5),
    ("smoke", 0.4),
    ("sparking", 0.4),
];

const CO_PHRASES: &[(&str, f32)] = &[
    ("carbon monoxide", 0.8),
    ("monoxide", 0.7),
    ("co detector", 0.6),
    ("co alarm", 0.6),
];

const NO_HEAT_PHRASES: &[(&str, f32)] = &[
    ("no heat", 0.35),
    ("heat is out", 0.35),
    ("heating is out", 0.35),
    ("furnace is dead", 0.35),
    ("furnace died", 0.35),
    ("heater stopped", 0.3),
];

/// Count toward NoHeat only when a no-heat phrase already matched.
const VULNERABLE_PHRASES: &[(&str, f32)] = &[
    ("baby", 0.3),
    ("infant", 0.3),
    ("newborn", 0.3),
    ("elderly", 0.3),
    ("grandmother", 0.3),
    ("grandfather", 0.3),
    ("freezing", 0.25),
];

const WATER_PHRASES: &[(&str, f32)] = &[
    ("burst pipe", 0.6),
    ("pipe burst", 0.6),
    ("pipe has burst", 0.6),
    ("flooding", 0.6),
    ("flooded", 0.6),
    ("water everywhere", 0.5),
    ("water pouring", 0.5),
    ("major leak", 0.5),
];

const GENERIC_PHRASES: &[(&str, f32)] = &[
    ("emergency", 0.4),
    ("call 911", 0.5),
    ("someone could get hurt", 0.3),
    ("not safe", 0.3),
];

/// Urgency wording that raises whichever category already matched.
const URGENCY_BOOSTERS: &[(&str, f32)] = &[
    ("help now", 0.25),
    ("right now", 0.2),
    ("immediately", 0.2),
    ("dangerous", 0.2),
    ("urgent", 0.15),
    ("hurry", 0.15),
];

const FRUSTRATION_PHRASES: &[&str] = &[
    "ridiculous",
    "unacceptable",
    "terrible",
    "awful",
    "fed up",
    "sick of this",
    "waste of my time",
    "wasting my time",
    "not listening",
    "you don't understand",
    "this is useless",
    "stupid",
];

fn phrase_score(haystack: &str, table: &[(&str, f32)]) -> f32 {
    table
        .iter()
        .filter(|(phrase, _)| haystack.contains(phrase))
        .map(|(_, weight)| weight)
        .sum()
}

/// Weighted-phrase emergency classifier. Stateless and side-effect free.
#[derive(Debug, Clone)]
pub struct EmergencyClassifier {
    threshold: f32,
}

impl Default for EmergencyClassifier {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

impl EmergencyClassifier {
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Classify one utterance. Case-insensitive, order-independent.
    pub fn classify(&self, utterance: &str) -> EmergencyVerdict {
        let text = utterance.to_lowercase();
        if text.trim().is_empty() {
            return EmergencyVerdict::none();
        }

        let mut no_heat = phrase_score(&text, NO_HEAT_PHRASES);
        if no_heat > 0.0 {
            no_heat += phrase_score(&text, VULNERABLE_PHRASES);
        }

        let scored = [
            (EmergencyCategory::GasLeak, phrase_score(&text, GAS_PHRASES)),
            (EmergencyCategory::Fire, phrase_score(&text, FIRE_PHRASES)),
            (
                EmergencyCategory::CarbonMonoxide,
                phrase_score(&text, CO_PHRASES),
            ),
            (EmergencyCategory::NoHeat, no_heat),
            (
                EmergencyCategory::WaterFailure,
                phrase_score(&text, WATER_PHRASES),
            ),
            (
                EmergencyCategory::Unspecified,
                phrase_score(&text, GENERIC_PHRASES),
            ),
        ];

        let (category, base) = scored
            .iter()
            .copied()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .unwrap_or((EmergencyCategory::Unspecified, 0.0));
        if base <= 0.0 {
            return EmergencyVerdict::none();
        }

        let confidence = (base + phrase_score(&text, URGENCY_BOOSTERS)).min(1.0);
        EmergencyVerdict {
            is_emergency: confidence >= self.threshold,
            category,
            confidence,
        }
    }
}

/// Does the utterance carry frustration wording?
pub fn has_frustration_wording(utterance: &str) -> bool {
    let text = utterance.to_lowercase();
    FRUSTRATION_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// Sustained caps-lock shouting: at least two words and no lowercase
/// letters across a mostly-alphabetic utterance.
pub fn is_shouting(utterance: &str) -> bool {
    let words = utterance.split_whitespace().count();
    if words < 2 {
        return false;
    }
    let letters: Vec<char> = utterance.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 8 && letters.iter().all(|c| c.is_uppercase())
}
