use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_MAX_CHUNK_PAYLOAD: usize = 153;
const DEFAULT_FIRST_CHUNK_RESERVE: usize = 7;
const DEFAULT_MIN_IMAGE_LEN: usize = 32;

/// Tunables for the protocol engine.
///
/// ```
/// use newtmgr::EngineConfig;
///
/// let config = EngineConfig::builder().max_chunk_payload(240).build();
/// assert_eq!(240, config.max_chunk_payload());
/// assert_eq!(7, config.first_chunk_reserve());
/// config.validate()?;
/// # Ok::<(), newtmgr::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct EngineConfig {
    /// Raw image bytes carried by one upload chunk.
    #[builder(default = DEFAULT_MAX_CHUNK_PAYLOAD)]
    max_chunk_payload: usize,
    /// Bytes taken off the first chunk, which also carries the total length.
    #[builder(default = DEFAULT_FIRST_CHUNK_RESERVE)]
    first_chunk_reserve: usize,
    /// Smallest image accepted for upload.
    #[builder(default = DEFAULT_MIN_IMAGE_LEN)]
    min_image_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_payload: DEFAULT_MAX_CHUNK_PAYLOAD,
            first_chunk_reserve: DEFAULT_FIRST_CHUNK_RESERVE,
            min_image_len: DEFAULT_MIN_IMAGE_LEN,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON object; absent keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the JSON is malformed or the values fail
    /// [`EngineConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every chunk, including the first, can carry image bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the chunk budget is zero or not larger than the
    /// first-chunk reserve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_payload == 0 {
            return Err(ConfigError::ZeroChunkBudget);
        }
        if self.first_chunk_reserve >= self.max_chunk_payload {
            return Err(ConfigError::ReserveExceedsBudget {
                reserve: self.first_chunk_reserve,
                budget: self.max_chunk_payload,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn max_chunk_payload(&self) -> usize {
        self.max_chunk_payload
    }

    #[must_use]
    pub fn first_chunk_reserve(&self) -> usize {
        self.first_chunk_reserve
    }

    #[must_use]
    pub fn min_image_len(&self) -> usize {
        self.min_image_len
    }
}
