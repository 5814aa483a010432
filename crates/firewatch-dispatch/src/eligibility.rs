//! Wave eligibility and the escalation plan.
//!
//! A verifier is eligible for a wave when all of these hold:
//!
//! - it is available (holds no unanswered request)
//! - its last request is at least `cooldown` old
//! - its tier is one the wave admits
//!
//! General waves admit every tier below expert and ask a random handful.
//! The final wave admits expert and master only, asks all of them, highest
//! points first.

use chrono::{DateTime, Duration, Utc};
use firewatch_registry::{RankTier, Verifier};
use serde::{Deserialize, Serialize};

/// How a wave picks among eligible candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// Uniformly random, at most `cap` verifiers.
    Random { cap: usize },
    /// Every candidate, highest points first.
    ByPointsDescending,
}

/// Predicate over pool entries for one wave.
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    pub allowed_tiers: Vec<RankTier>,
    pub cooldown: Duration,
}

impl Eligibility {
    pub fn new(allowed_tiers: Vec<RankTier>, cooldown: Duration) -> Self {
        Self {
            allowed_tiers,
            cooldown,
        }
    }

    pub fn admits(&self, verifier: &Verifier, now: DateTime<Utc>) -> bool {
        verifier.available
            && verifier.cooled_down(now, self.cooldown)
            && self.allowed_tiers.contains(&verifier.rank())
    }
}

/// One step of the escalation plan.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveSpec {
    /// 1-based position in the plan.
    pub number: u8,
    pub eligibility: Eligibility,
    pub selection: Selection,
}

impl WaveSpec {
    pub fn is_ranked(&self) -> bool {
        matches!(self.selection, Selection::ByPointsDescending)
    }
}

/// Ordered sequence of waves run for an alert.
#[derive(Debug, Clone, PartialEq)]
pub struct WavePlan {
    waves: Vec<WaveSpec>,
}

impl WavePlan {
    /// Largest number of general waves; the ranked wave takes the next
    /// number, which must still fit a `u8`.
    pub const MAX_GENERAL_WAVES: u8 = u8::MAX - 1;

    /// `general_waves` random waves of `general_size` over `general_tiers`,
    /// followed by one uncapped wave over `ranked_tiers`.
    ///
    /// `general_waves` is clamped to [`WavePlan::MAX_GENERAL_WAVES`].
    pub fn new(
        general_waves: u8,
        general_size: usize,
        general_tiers: Vec<RankTier>,
        ranked_tiers: Vec<RankTier>,
        cooldown: Duration,
    ) -> Self {
        let general_waves = general_waves.min(Self::MAX_GENERAL_WAVES);
        let mut waves: Vec<WaveSpec> = (1..=general_waves)
            .map(|number| WaveSpec {
                number,
                eligibility: Eligibility::new(general_tiers.clone(), cooldown),
                selection: Selection::Random { cap: general_size },
            })
            .collect();
        waves.push(WaveSpec {
            number: general_waves + 1,
            eligibility: Eligibility::new(ranked_tiers, cooldown),
            selection: Selection::ByPointsDescending,
        });
        Self { waves }
    }

    /// Two general waves of five (rookie, trusted), then expert and master,
    /// with a ten minute cooldown.
    pub fn standard() -> Self {
        Self::new(
            2,
            5,
            vec![RankTier::Rookie, RankTier::Trusted],
            vec![RankTier::Expert, RankTier::Master],
            Duration::minutes(10),
        )
    }

    pub fn waves(&self) -> &[WaveSpec] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

impl Default for WavePlan {
    fn default() -> Self {
        Self::standard()
    }
}
