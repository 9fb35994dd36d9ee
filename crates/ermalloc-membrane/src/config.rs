//! Engine configuration.
//!
//! Read once from the environment by the ABI layer, or built directly in
//! tests:
//! - `ERMALLOC_MODE`: `preserve` (default, alias `strict`) leaves granules
//!   that cannot be repaired exactly as they are; `best_effort` (alias
//!   `hardened`) rewrites them with the decoder's best guess so later
//!   accesses stop reporting them.
//! - `ERMALLOC_KEY`: key material for the encryption policy, hashed with
//!   SHA-256. Unset means an ephemeral per-process key.
//! - `ERMALLOC_LOG`: minimum lifecycle log level, or `off`.
//! - `ERMALLOC_LOG_CAPACITY`: number of lifecycle records retained.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::CipherKey;
use crate::log::LogLevel;

pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// What the engine does with data it cannot repair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairMode {
    /// Leave unrepairable granules unmodified and report them.
    #[default]
    Preserve,
    /// Re-encode the best-effort guess over unrepairable granules.
    BestEffort,
}

impl RepairMode {
    /// Parse from string (case-insensitive). Unknown values fall back to
    /// [`RepairMode::Preserve`].
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardened" | "best-effort" | "best_effort" | "repair" => Self::BestEffort,
            _ => Self::Preserve,
        }
    }

    #[must_use]
    pub const fn rewrites_failures(self) -> bool {
        matches!(self, Self::BestEffort)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Preserve => "preserve",
            Self::BestEffort => "best_effort",
        }
    }
}

/// Runtime settings for a [`crate::ResilientHeap`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: RepairMode,
    pub key: CipherKey,
    /// `None` disables lifecycle logging.
    pub log_level: Option<LogLevel>,
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: RepairMode::default(),
            key: ephemeral_key(),
            log_level: Some(LogLevel::Warn),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Configuration from `ERMALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(mode) = lookup("ERMALLOC_MODE") {
            config.mode = RepairMode::from_str_loose(&mode);
        }
        if let Some(material) = lookup("ERMALLOC_KEY").filter(|m| !m.is_empty()) {
            config.key = CipherKey::from_material(material.as_bytes());
        }
        if let Some(level) = lookup("ERMALLOC_LOG") {
            config.log_level = parse_log_level(&level);
        }
        if let Some(capacity) = lookup("ERMALLOC_LOG_CAPACITY")
            .and_then(|c| c.trim().parse::<usize>().ok())
        {
            config.log_capacity = capacity;
        }
        config
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RepairMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_key_material(mut self, material: &[u8]) -> Self {
        self.key = CipherKey::from_material(material);
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: Option<LogLevel>) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}

fn parse_log_level(raw: &str) -> Option<LogLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "none" | "disabled" => None,
        other => Some(LogLevel::from_str_loose(other)),
    }
}

/// Per-process key from the pid, the clock and a stack address.
fn ephemeral_key() -> CipherKey {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let marker = 0u8;
    let addr = std::ptr::addr_of!(marker) as usize;

    let mut material = Vec::with_capacity(32);
    material.extend_from_slice(&std::process::id().to_le_bytes());
    material.extend_from_slice(&nanos.to_le_bytes());
    material.extend_from_slice(&addr.to_le_bytes());
    CipherKey::from_material(&material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn parse_repair_modes() {
        assert_eq!(RepairMode::from_str_loose("strict"), RepairMode::Preserve);
        assert_eq!(RepairMode::from_str_loose("PRESERVE"), RepairMode::Preserve);
        assert_eq!(RepairMode::from_str_loose("hardened"), RepairMode::BestEffort);
        assert_eq!(RepairMode::from_str_loose("Best-Effort"), RepairMode::BestEffort);
        assert_eq!(RepairMode::from_str_loose("garbage"), RepairMode::Preserve);
        assert!(RepairMode::BestEffort.rewrites_failures());
        assert!(!RepairMode::Preserve.rewrites_failures());
        for mode in [RepairMode::Preserve, RepairMode::BestEffort] {
            assert_eq!(RepairMode::from_str_loose(mode.name()), mode);
        }
        assert_eq!(RepairMode::default().name(), "preserve");
    }

    #[test]
    fn defaults_without_environment() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config.mode, RepairMode::Preserve);
        assert_eq!(config.log_level, Some(LogLevel::Warn));
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn environment_overrides_everything() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ERMALLOC_MODE", "hardened"),
            ("ERMALLOC_KEY", "hunter2"),
            ("ERMALLOC_LOG", "debug"),
            ("ERMALLOC_LOG_CAPACITY", " 16 "),
        ]));
        assert_eq!(config.mode, RepairMode::BestEffort);
        assert_eq!(config.key, CipherKey::from_material(b"hunter2"));
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(config.log_capacity, 16);
    }

    #[test]
    fn log_can_be_disabled_and_bad_capacity_ignored() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ERMALLOC_LOG", "OFF"),
            ("ERMALLOC_LOG_CAPACITY", "lots"),
        ]));
        assert_eq!(config.log_level, None);
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn configured_keys_are_deterministic() {
        let a = EngineConfig::default().with_key_material(b"k");
        let b = EngineConfig::default().with_key_material(b"k");
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn builders_set_fields() {
        let config = EngineConfig::default()
            .with_mode(RepairMode::BestEffort)
            .with_log_level(Some(LogLevel::Trace))
            .with_log_capacity(2);
        assert_eq!(config.mode, RepairMode::BestEffort);
        assert_eq!(config.log_level, Some(LogLevel::Trace));
        assert_eq!(config.log_capacity, 2);
    }
}
