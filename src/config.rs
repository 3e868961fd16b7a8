//! Store configuration.

use std::fmt;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Maximum length of a store name, in bytes.
pub const MAX_STORE_NAME_LEN: usize = 128;

/// How many items a store can hold.
///
/// Serialized as `"unbounded"` or `{"bounded": n}`; `n` must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// At most this many items.
    Bounded(NonZeroUsize),
    /// No limit; puts never wait.
    Unbounded,
}

impl Capacity {
    /// Creates a bounded capacity. Fails for zero.
    pub fn bounded(limit: usize) -> StoreResult<Self> {
        NonZeroUsize::new(limit)
            .map(Self::Bounded)
            .ok_or_else(|| StoreError::invalid_config("capacity must be > 0"))
    }

    /// The limit, or `None` if unbounded.
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Bounded(limit) => Some(limit.get()),
            Self::Unbounded => None,
        }
    }

    /// Returns true if there is no limit.
    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// Slots not taken by `used` units (`usize::MAX` when unbounded).
    #[must_use]
    pub const fn free(self, used: usize) -> usize {
        match self {
            Self::Bounded(limit) => limit.get().saturating_sub(used),
            Self::Unbounded => usize::MAX,
        }
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Self::Unbounded
    }
}

impl From<NonZeroUsize> for Capacity {
    fn from(limit: NonZeroUsize) -> Self {
        Self::Bounded(limit)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(limit) => write!(f, "{limit}"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Monitor subscription settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Per-subscriber event buffer. Events beyond it are dropped and counted.
    pub buffer_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
        }
    }
}

/// Store construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Human-readable name, used in log fields.
    pub name: String,
    /// Item capacity.
    pub capacity: Capacity,
    /// Monitor subscription settings.
    pub monitor: MonitorConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            capacity: Capacity::Unbounded,
            monitor: MonitorConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a config with default monitor settings.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: Capacity) -> Self {
        Self {
            name: name.into(),
            capacity,
            ..Self::default()
        }
    }

    /// Validate the config.
    ///
    /// Called by the store constructors.
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::invalid_config("name must not be empty"));
        }
        if self.name.len() > MAX_STORE_NAME_LEN {
            return Err(StoreError::invalid_config(format!(
                "name exceeds maximum length of {MAX_STORE_NAME_LEN}"
            )));
        }
        if self.monitor.buffer_capacity == 0 {
            return Err(StoreError::invalid_config(
                "monitor.buffer_capacity must be > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn config_rejects_bad_fields() {
        let mut c = StoreConfig::default();
        c.name = "  ".to_string();
        assert!(c.validate().unwrap_err().is_config());

        let mut c = StoreConfig::default();
        c.name = "x".repeat(MAX_STORE_NAME_LEN + 1);
        assert!(c.validate().is_err());

        let mut c = StoreConfig::default();
        c.monitor.buffer_capacity = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn capacity_bounded_rejects_zero() {
        assert!(Capacity::bounded(0).is_err());
        assert_eq!(Capacity::bounded(3).unwrap().limit(), Some(3));
        assert_eq!(Capacity::Unbounded.limit(), None);
    }

    #[test]
    fn capacity_free_slots() {
        let cap = Capacity::bounded(4).unwrap();
        assert_eq!(cap.free(1), 3);
        assert_eq!(cap.free(9), 0);
        assert_eq!(Capacity::Unbounded.free(1_000), usize::MAX);
    }

    #[test]
    fn capacity_serde_shapes() {
        let json = serde_json::to_string(&Capacity::bounded(2).unwrap()).unwrap();
        assert_eq!(json, r#"{"bounded":2}"#);
        assert_eq!(serde_json::to_string(&Capacity::Unbounded).unwrap(), r#""unbounded""#);

        let zero: Result<Capacity, _> = serde_json::from_str(r#"{"bounded":0}"#);
        assert!(zero.is_err());
    }

    #[test]
    fn config_from_partial_json() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"name":"buffer-a","capacity":{"bounded":5}}"#).unwrap();
        assert_eq!(config.name, "buffer-a");
        assert_eq!(config.capacity.limit(), Some(5));
        assert_eq!(config.monitor, MonitorConfig::default());
        config.validate().unwrap();
    }
}
