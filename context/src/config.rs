//! Chunking configuration.
//!
//! Budgets are character counts. Values can be built in code, deserialized,
//! or loaded from environment variables:
//! - `TRACECTX_CHUNK_STRATEGY`: `semantic` (default) or `sequential`
//! - `TRACECTX_CHUNK_SIZE`: budget for the selected strategy
//! - `TRACECTX_MIN_CHUNK_SIZE`: semantic minimum chunk size
//! - `TRACECTX_OVERLAP_SIZE`: sequential window overlap

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

/// Default semantic chunk budget.
pub const DEFAULT_SEMANTIC_CHUNK_SIZE: usize = 50_000;
/// Default semantic minimum chunk size.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 25_000;
/// Default sequential window size.
pub const DEFAULT_SEQUENTIAL_CHUNK_SIZE: usize = 200_000;
/// Default sequential window overlap.
pub const DEFAULT_OVERLAP_SIZE: usize = 5_000;

/// Errors raised by invalid chunking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field is outside its allowed range.
    #[error("Invalid chunk configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// The overlap would keep the window from advancing.
    #[error("Overlap size ({overlap_size}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge {
        /// Configured overlap.
        overlap_size: usize,
        /// Configured chunk size.
        chunk_size: usize,
    },

    /// The minimum chunk size exceeds the budget.
    #[error("Minimum chunk size ({min_chunk_size}) cannot exceed chunk size ({chunk_size})")]
    MinChunkTooLarge {
        /// Configured minimum.
        min_chunk_size: usize,
        /// Configured chunk size.
        chunk_size: usize,
    },

    /// An environment variable could not be parsed.
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Parse error.
        reason: String,
    },
}

/// Which chunking strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Hierarchy-aware bin packing over the parsed tree.
    #[default]
    Semantic,
    /// Fixed-width overlapping windows over the raw text.
    Sequential,
}

impl std::fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => write!(f, "semantic"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "semantic" => Ok(Self::Semantic),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("unknown chunk strategy '{other}'")),
        }
    }
}

/// Settings of the hierarchy-aware chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SemanticChunkConfig {
    /// Character budget per fragment.
    #[validate(range(min = 1, message = "Chunk size must be greater than zero"))]
    pub chunk_size: usize,

    /// Trailing log batches smaller than this are topped up from the
    /// preceding batch. Zero disables rebalancing.
    #[serde(default)]
    pub min_chunk_size: usize,
}

impl SemanticChunkConfig {
    /// Creates a config with the given budget and no minimum.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            min_chunk_size: 0,
        }
    }

    /// Sets the minimum chunk size.
    #[must_use]
    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        self.min_chunk_size = min_chunk_size;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The chunk size is zero
    /// - The minimum chunk size exceeds the chunk size
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.min_chunk_size > self.chunk_size {
            return Err(ConfigError::MinChunkTooLarge {
                min_chunk_size: self.min_chunk_size,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}

impl Default for SemanticChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_SEMANTIC_CHUNK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
        }
    }
}

/// Settings of the overlapping-window chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SequentialChunkConfig {
    /// Window width in characters.
    #[validate(range(min = 1, message = "Chunk size must be greater than zero"))]
    pub chunk_size: usize,

    /// Characters shared by consecutive windows.
    #[serde(default)]
    pub overlap_size: usize,
}

impl SequentialChunkConfig {
    /// Creates a config.
    #[must_use]
    pub fn new(chunk_size: usize, overlap_size: usize) -> Self {
        Self {
            chunk_size,
            overlap_size,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The chunk size is zero
    /// - The overlap is not smaller than the chunk size
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.overlap_size >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap_size: self.overlap_size,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}

impl Default for SequentialChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_SEQUENTIAL_CHUNK_SIZE,
            overlap_size: DEFAULT_OVERLAP_SIZE,
        }
    }
}

/// Optional settings layered over a [`ChunkConfig`], from the environment or
/// command-line flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOverrides {
    /// Strategy to select.
    pub strategy: Option<ChunkStrategy>,
    /// Budget for the selected strategy.
    pub chunk_size: Option<usize>,
    /// Semantic minimum chunk size.
    pub min_chunk_size: Option<usize>,
    /// Sequential window overlap.
    pub overlap_size: Option<usize>,
}

/// Complete chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Selected strategy.
    #[serde(default)]
    pub strategy: ChunkStrategy,
    /// Semantic chunker settings.
    #[serde(default)]
    pub semantic: SemanticChunkConfig,
    /// Sequential chunker settings.
    #[serde(default)]
    pub sequential: SequentialChunkConfig,
}

impl ChunkConfig {
    /// Semantic chunking with the given budget.
    #[must_use]
    pub fn semantic(config: SemanticChunkConfig) -> Self {
        Self {
            strategy: ChunkStrategy::Semantic,
            semantic: config,
            ..Self::default()
        }
    }

    /// Sequential chunking with the given window.
    #[must_use]
    pub fn sequential(config: SequentialChunkConfig) -> Self {
        Self {
            strategy: ChunkStrategy::Sequential,
            sequential: config,
            ..Self::default()
        }
    }

    /// Loads the configuration from environment variables, falling back to
    /// defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let overrides = ChunkOverrides {
            strategy: env_parse("TRACECTX_CHUNK_STRATEGY")?,
            chunk_size: env_parse("TRACECTX_CHUNK_SIZE")?,
            min_chunk_size: env_parse("TRACECTX_MIN_CHUNK_SIZE")?,
            overlap_size: env_parse("TRACECTX_OVERLAP_SIZE")?,
        };
        Self::default().with_overrides(overrides)
    }

    /// Applies `overrides` and validates the result.
    ///
    /// The chunk size goes to the strategy selected after the override. When
    /// no minimum chunk size is given, the current one is capped at the
    /// semantic budget.
    ///
    /// # Errors
    ///
    /// Returns the selected strategy's validation error.
    pub fn with_overrides(mut self, overrides: ChunkOverrides) -> Result<Self, ConfigError> {
        if let Some(strategy) = overrides.strategy {
            self.strategy = strategy;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            match self.strategy {
                ChunkStrategy::Semantic => self.semantic.chunk_size = chunk_size,
                ChunkStrategy::Sequential => self.sequential.chunk_size = chunk_size,
            }
        }
        self.semantic.min_chunk_size = match overrides.min_chunk_size {
            Some(min_chunk_size) => min_chunk_size,
            None => self.semantic.min_chunk_size.min(self.semantic.chunk_size),
        };
        if let Some(overlap_size) = overrides.overlap_size {
            self.sequential.overlap_size = overlap_size;
        }

        self.validate_config()?;
        Ok(self)
    }

    /// Validates the settings of the selected strategy.
    ///
    /// # Errors
    ///
    /// Returns the selected strategy's validation error.
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        match self.strategy {
            ChunkStrategy::Semantic => self.semantic.validate_config(),
            ChunkStrategy::Sequential => self.sequential.validate_config(),
        }
    }
}

fn env_parse<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Ok(value) = std::env::var(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidEnv {
            var,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChunkConfig::default();
        assert_eq!(config.strategy, ChunkStrategy::Semantic);
        assert_eq!(config.semantic.chunk_size, 50_000);
        assert_eq!(config.semantic.min_chunk_size, 25_000);
        assert_eq!(config.sequential.chunk_size, 200_000);
        assert_eq!(config.sequential.overlap_size, 5_000);
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_sequential_overlap_too_large() {
        let result = SequentialChunkConfig::new(100, 100).validate_config();
        assert!(matches!(
            result,
            Err(ConfigError::OverlapTooLarge {
                overlap_size: 100,
                chunk_size: 100
            })
        ));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            SemanticChunkConfig::new(0).validate_config(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SequentialChunkConfig::new(0, 0).validate_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_min_chunk_size_too_large() {
        let result = SemanticChunkConfig::new(10).with_min_chunk_size(11).validate_config();
        assert!(matches!(result, Err(ConfigError::MinChunkTooLarge { .. })));
    }

    #[test]
    fn test_validate_checks_selected_strategy_only() {
        let mut config = ChunkConfig::semantic(SemanticChunkConfig::new(500));
        config.sequential = SequentialChunkConfig::new(10, 20);
        assert!(config.validate_config().is_ok());

        config.strategy = ChunkStrategy::Sequential;
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Sequential".parse::<ChunkStrategy>(), Ok(ChunkStrategy::Sequential));
        assert!("random".parse::<ChunkStrategy>().is_err());
        assert_eq!(ChunkStrategy::Semantic.to_string(), "semantic");
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("TRACECTX_CHUNK_STRATEGY", "semantic");
        std::env::set_var("TRACECTX_CHUNK_SIZE", "1000");
        let config = ChunkConfig::from_env().unwrap();
        assert_eq!(config.semantic.chunk_size, 1000);
        assert_eq!(config.semantic.min_chunk_size, 1000);
        assert_eq!(config.sequential, SequentialChunkConfig::default());

        std::env::set_var("TRACECTX_CHUNK_SIZE", "lots");
        let result = ChunkConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                var: "TRACECTX_CHUNK_SIZE",
                ..
            })
        ));

        std::env::remove_var("TRACECTX_CHUNK_STRATEGY");
        std::env::remove_var("TRACECTX_CHUNK_SIZE");
        assert_eq!(ChunkConfig::from_env().unwrap(), ChunkConfig::default());
    }

    #[test]
    fn test_overrides_follow_selected_strategy() {
        let config = ChunkConfig::default()
            .with_overrides(ChunkOverrides {
                strategy: Some(ChunkStrategy::Sequential),
                chunk_size: Some(1_000),
                overlap_size: Some(100),
                ..ChunkOverrides::default()
            })
            .unwrap();

        assert_eq!(config.strategy, ChunkStrategy::Sequential);
        assert_eq!(config.sequential, SequentialChunkConfig::new(1_000, 100));
        assert_eq!(config.semantic, SemanticChunkConfig::default());
    }

    #[test]
    fn test_overrides_cap_unset_minimum() {
        let config = ChunkConfig::default()
            .with_overrides(ChunkOverrides {
                chunk_size: Some(800),
                ..ChunkOverrides::default()
            })
            .unwrap();
        assert_eq!(config.semantic, SemanticChunkConfig::new(800).with_min_chunk_size(800));

        let result = ChunkConfig::default().with_overrides(ChunkOverrides {
            chunk_size: Some(800),
            min_chunk_size: Some(900),
            ..ChunkOverrides::default()
        });
        assert!(matches!(result, Err(ConfigError::MinChunkTooLarge { .. })));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let json = r#"{"strategy": "sequential", "sequential": {"chunk_size": 1000, "overlap_size": 10}}"#;
        let config: ChunkConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.strategy, ChunkStrategy::Sequential);
        assert_eq!(config.sequential.chunk_size, 1000);
        assert_eq!(config.semantic, SemanticChunkConfig::default());
    }
}
