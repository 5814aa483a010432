//! Configuration types for Firewatch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use firewatch_council::{ConsensusResolver, ReputationScorer};
use firewatch_dispatch::WavePlan;
use firewatch_registry::RankTier;
use serde::{Deserialize, Serialize};

use crate::error::FirewatchError;
use crate::Result;

/// Upper bound for every `*_secs` setting (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Configuration for the verification core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewatchConfig {
    pub storage: StorageConfig,
    pub detection: DetectionConfig,
    pub waves: WaveConfig,
    pub consensus: ConsensusConfig,
    pub scoring: ScoringConfig,
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the sled database directory.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./firewatch.db"),
        }
    }
}

/// When a detection triggers verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Confidence must be strictly greater than this to escalate.
    pub acceptance_threshold: f64,

    /// Verification deadline, counted from the detection.
    pub verification_horizon_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.5,
            verification_horizon_secs: 300,
        }
    }
}

/// Escalation wave settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// How long each wave waits for quorum before escalating.
    pub wave_timeout_secs: u64,

    /// Minimum time between two requests to the same verifier.
    pub cooldown_secs: u64,

    /// Number of general (random) waves before the ranked wave.
    pub general_waves: u8,

    /// Maximum verifiers asked per general wave.
    pub general_wave_size: usize,

    pub general_tiers: Vec<RankTier>,

    pub ranked_tiers: Vec<RankTier>,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            wave_timeout_secs: 30,
            cooldown_secs: 600,
            general_waves: 2,
            general_wave_size: 5,
            general_tiers: vec![RankTier::Rookie, RankTier::Trusted],
            ranked_tiers: vec![RankTier::Expert, RankTier::Master],
        }
    }
}

/// Quorum rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Votes cast before an alert can resolve.
    pub quorum: u32,

    /// Affirmative votes among them needed to confirm.
    pub affirmative_required: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum: 3,
            affirmative_required: 2,
        }
    }
}

/// Reputation awards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_points: u64,
    pub ranked_base_points: u64,
    /// One bonus point per second answered inside this window.
    pub speed_window_secs: u64,
    /// Tiers that earn `ranked_base_points`.
    pub ranked_tiers: Vec<RankTier>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_points: 10,
            ranked_base_points: 20,
            speed_window_secs: 30,
            ranked_tiers: vec![RankTier::Expert, RankTier::Master],
        }
    }
}

impl FirewatchConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| FirewatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FirewatchError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FirewatchError::Config(e.to_string()))
    }

    /// Rejects settings the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(FirewatchError::Config(msg.to_string()));

        if !(0.0..=1.0).contains(&self.detection.acceptance_threshold) {
            return invalid("detection.acceptance_threshold must be between 0.0 and 1.0");
        }
        if self.waves.wave_timeout_secs == 0 {
            return invalid("waves.wave_timeout_secs must be positive");
        }
        let durations = [
            ("detection.verification_horizon_secs", self.detection.verification_horizon_secs),
            ("waves.wave_timeout_secs", self.waves.wave_timeout_secs),
            ("waves.cooldown_secs", self.waves.cooldown_secs),
            ("scoring.speed_window_secs", self.scoring.speed_window_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(FirewatchError::Config(format!(
                    "{} must not exceed {} seconds",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if self.waves.general_waves > WavePlan::MAX_GENERAL_WAVES {
            return Err(FirewatchError::Config(format!(
                "waves.general_waves must not exceed {}",
                WavePlan::MAX_GENERAL_WAVES
            )));
        }
        if self.waves.general_wave_size == 0 {
            return invalid("waves.general_wave_size must be positive");
        }
        if self.waves.general_tiers.is_empty() || self.waves.ranked_tiers.is_empty() {
            return invalid("waves tier lists must not be empty");
        }
        if self.consensus.quorum == 0 {
            return invalid("consensus.quorum must be positive");
        }
        if self.consensus.affirmative_required > self.consensus.quorum {
            return invalid("consensus.affirmative_required cannot exceed consensus.quorum");
        }
        Ok(())
    }

    pub fn wave_timeout(&self) -> Duration {
        Duration::from_secs(self.waves.wave_timeout_secs)
    }

    pub fn verification_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.detection.verification_horizon_secs as i64)
    }

    pub fn wave_plan(&self) -> WavePlan {
        WavePlan::new(
            self.waves.general_waves,
            self.waves.general_wave_size,
            self.waves.general_tiers.clone(),
            self.waves.ranked_tiers.clone(),
            chrono::Duration::seconds(self.waves.cooldown_secs as i64),
        )
    }

    pub fn resolver(&self) -> ConsensusResolver {
        ConsensusResolver::with_quorum(self.consensus.quorum, self.consensus.affirmative_required)
    }

    pub fn scorer(&self) -> ReputationScorer {
        ReputationScorer::new()
            .with_base_points(self.scoring.base_points, self.scoring.ranked_base_points)
            .with_speed_window(self.scoring.speed_window_secs)
            .with_ranked_tiers(self.scoring.ranked_tiers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FirewatchConfig::default();
        assert_eq!(config.detection.acceptance_threshold, 0.5);
        assert_eq!(config.waves.wave_timeout_secs, 30);
        assert_eq!(config.consensus.quorum, 3);
        assert!(config.validate().is_ok());
        assert_eq!(config.wave_plan().len(), 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FirewatchConfig::from_toml_str(
            r#"
            [waves]
            wave_timeout_secs = 45
            ranked_tiers = ["expert", "master", "legend"]

            [consensus]
            quorum = 5
            affirmative_required = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.waves.wave_timeout_secs, 45);
        assert_eq!(config.waves.general_wave_size, 5);
        assert_eq!(config.waves.ranked_tiers.len(), 3);
        assert_eq!(config.consensus.quorum, 5);
        assert_eq!(config.scoring.base_points, 10);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = FirewatchConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(FirewatchConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_bad_quorum() {
        let mut config = FirewatchConfig::default();
        config.consensus.affirmative_required = 4;
        assert!(matches!(config.validate(), Err(FirewatchError::Config(_))));

        config.consensus = ConsensusConfig::default();
        config.detection.acceptance_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_durations_and_wave_count() {
        let mut config = FirewatchConfig::default();
        config.detection.verification_horizon_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(FirewatchError::Config(ref m)) if m.contains("verification_horizon_secs")
        ));

        config.detection = DetectionConfig::default();
        config.waves.cooldown_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());

        config.waves.cooldown_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.wave_plan().waves()[0].eligibility.cooldown,
            chrono::Duration::seconds(MAX_DURATION_SECS as i64)
        );

        config.waves.general_waves = u8::MAX;
        assert!(matches!(
            config.validate(),
            Err(FirewatchError::Config(ref m)) if m.contains("general_waves")
        ));
        config.waves.general_waves = WavePlan::MAX_GENERAL_WAVES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_values_rejected_from_toml() {
        let text = "[waves]\nwave_timeout_secs = 9223372036854775807\n";
        let err = FirewatchConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, FirewatchError::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = FirewatchConfig::from_toml_str("[waves\nbroken").unwrap_err();
        assert!(matches!(err, FirewatchError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("firewatch.toml");
        std::fs::write(&path, "[detection]\nacceptance_threshold = 0.65\n").unwrap();

        let config = FirewatchConfig::load(&path).unwrap();
        assert_eq!(config.detection.acceptance_threshold, 0.65);
        assert!(FirewatchConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
