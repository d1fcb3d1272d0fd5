//! Per-namespace record validators and selectors.
//!
//! A record key's first path segment (`/v/...` → `v`) selects which
//! validator checks inbound records and which selector arbitrates between
//! conflicting candidates for the same key. Both registries are per-instance
//! configuration: the DHT facade owns one [`ValidatorRegistry`], and callers
//! register their namespaces before starting. Signature schemes live behind
//! this seam — the DHT itself never touches key material.

use std::collections::HashMap;
use std::sync::Arc;

use cairn_types::{record::namespace_of, Record};

use crate::{DhtError, Result};

/// Validates records for one namespace.
pub trait RecordValidator: Send + Sync {
    /// Check a record against this namespace's rules.
    ///
    /// Rejection means the record is discarded, never stored.
    fn validate(&self, key: &[u8], record: &Record) -> Result<()>;

    /// Whether records in this namespace must carry a signature.
    fn requires_signature(&self) -> bool {
        false
    }
}

/// Picks the best of several candidate records for one key.
pub trait RecordSelector: Send + Sync {
    /// Index of the best record. `records` is never empty.
    fn select(&self, key: &[u8], records: &[Record]) -> usize;
}

/// Per-instance registry of validators and selectors, keyed by namespace.
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn RecordValidator>>,
    selectors: HashMap<String, Arc<dyn RecordSelector>>,
}

impl ValidatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
            selectors: HashMap::new(),
        }
    }

    /// A registry with the `v` namespace wired to [`BasicValidator`] and
    /// [`LatestSelector`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_validator("v", Arc::new(BasicValidator));
        registry.register_selector("v", Arc::new(LatestSelector));
        registry
    }

    /// Register a validator for a namespace, replacing any existing one.
    pub fn register_validator(&mut self, namespace: &str, validator: Arc<dyn RecordValidator>) {
        self.validators.insert(namespace.to_string(), validator);
    }

    /// Register a selector for a namespace, replacing any existing one.
    pub fn register_selector(&mut self, namespace: &str, selector: Arc<dyn RecordSelector>) {
        self.selectors.insert(namespace.to_string(), selector);
    }

    /// Validate a record against its namespace's validator.
    pub fn validate(&self, key: &[u8], record: &Record) -> Result<()> {
        let ns = namespace_for(key)?;
        let validator = self
            .validators
            .get(ns)
            .ok_or_else(|| DhtError::UnknownNamespace(ns.to_string()))?;
        validator.validate(key, record)
    }

    /// Index of the best candidate record for `key`.
    pub fn select(&self, key: &[u8], records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Err(DhtError::InvalidRecord(
                "no candidate records to select from".to_string(),
            ));
        }
        if records.len() == 1 {
            return Ok(0);
        }
        let ns = namespace_for(key)?;
        let selector = self
            .selectors
            .get(ns)
            .ok_or_else(|| DhtError::UnknownNamespace(ns.to_string()))?;
        Ok(selector.select(key, records).min(records.len() - 1))
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn namespace_for(key: &[u8]) -> Result<&str> {
    namespace_of(key).ok_or_else(|| {
        DhtError::InvalidRecord(format!(
            "record key has no namespace: {}",
            String::from_utf8_lossy(key)
        ))
    })
}

/// Structural validator: the record must match its key and carry a value.
pub struct BasicValidator;

impl RecordValidator for BasicValidator {
    fn validate(&self, key: &[u8], record: &Record) -> Result<()> {
        if record.key != key {
            return Err(DhtError::InvalidRecord(
                "record key does not match message key".to_string(),
            ));
        }
        if record.value.is_empty() {
            return Err(DhtError::InvalidRecord("record value is empty".to_string()));
        }
        Ok(())
    }
}

/// Selector preferring the most recently received record.
pub struct LatestSelector;

impl RecordSelector for LatestSelector {
    fn select(&self, _key: &[u8], records: &[Record]) -> usize {
        records
            .iter()
            .enumerate()
            .max_by_key(|(_, r)| r.time_received.unwrap_or(0))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &[u8], value: &[u8], time: Option<u64>) -> Record {
        Record {
            key: key.to_vec(),
            value: value.to_vec(),
            time_received: time,
        }
    }

    #[test]
    fn test_basic_validator_accepts_matching_record() {
        let registry = ValidatorRegistry::with_defaults();
        let rec = record(b"/v/name", b"value", None);
        assert!(registry.validate(b"/v/name", &rec).is_ok());
    }

    #[test]
    fn test_basic_validator_rejects_key_mismatch() {
        let registry = ValidatorRegistry::with_defaults();
        let rec = record(b"/v/other", b"value", None);
        assert!(registry.validate(b"/v/name", &rec).is_err());
    }

    #[test]
    fn test_basic_validator_rejects_empty_value() {
        let registry = ValidatorRegistry::with_defaults();
        let rec = record(b"/v/name", b"", None);
        assert!(registry.validate(b"/v/name", &rec).is_err());
    }

    #[test]
    fn test_unknown_namespace_rejected() {
        let registry = ValidatorRegistry::with_defaults();
        let rec = record(b"/pk/name", b"value", None);
        assert!(matches!(
            registry.validate(b"/pk/name", &rec),
            Err(DhtError::UnknownNamespace(_))
        ));
    }

    #[test]
    fn test_key_without_namespace_rejected() {
        let registry = ValidatorRegistry::with_defaults();
        let rec = record(b"raw-key", b"value", None);
        assert!(registry.validate(b"raw-key", &rec).is_err());
    }

    #[test]
    fn test_latest_selector_picks_newest() {
        let registry = ValidatorRegistry::with_defaults();
        let candidates = vec![
            record(b"/v/k", b"old", Some(100)),
            record(b"/v/k", b"new", Some(300)),
            record(b"/v/k", b"mid", Some(200)),
        ];
        assert_eq!(registry.select(b"/v/k", &candidates).expect("select"), 1);
    }

    #[test]
    fn test_select_single_candidate_skips_selector() {
        // One candidate needs no registered selector for its namespace.
        let registry = ValidatorRegistry::new();
        let candidates = vec![record(b"/unknown/k", b"x", None)];
        assert_eq!(
            registry.select(b"/unknown/k", &candidates).expect("select"),
            0
        );
    }

    #[test]
    fn test_select_with_no_candidates_errors() {
        let registry = ValidatorRegistry::with_defaults();
        assert!(registry.select(b"/v/k", &[]).is_err());
    }

    #[test]
    fn test_custom_namespace_registration() {
        let mut registry = ValidatorRegistry::new();
        registry.register_validator("app", Arc::new(BasicValidator));
        let rec = record(b"/app/k", b"v", None);
        assert!(registry.validate(b"/app/k", &rec).is_ok());
    }
}
