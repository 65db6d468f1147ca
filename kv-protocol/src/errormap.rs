//! The XERROR error map (`spec.md` §6.3): a JSON document, keyed by status
//! code, of behavioural attributes the retry orchestrator consults.

use serde::Deserialize;
use std::collections::HashMap;

/// One entry of the closed attribute set (`spec.md` §7). Unknown attribute
/// strings are ignored with a warning at parse time rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorMapAttribute {
    Success,
    ItemOnly,
    InvalidInput,
    FetchConfig,
    ConnStateInvalidated,
    Auth,
    SpecialHandling,
    Support,
    Temp,
    Internal,
    RetryNow,
    RetryLater,
    Subdoc,
    Dcp,
    AutoRetry,
    ItemLocked,
    ItemDeleted,
    RateLimit,
}

impl ErrorMapAttribute {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "success" => Self::Success,
            "item-only" => Self::ItemOnly,
            "invalid-input" => Self::InvalidInput,
            "fetch-config" => Self::FetchConfig,
            "conn-state-invalidated" => Self::ConnStateInvalidated,
            "auth" => Self::Auth,
            "special-handling" => Self::SpecialHandling,
            "support" => Self::Support,
            "temp" => Self::Temp,
            "internal" => Self::Internal,
            "retry-now" => Self::RetryNow,
            "retry-later" => Self::RetryLater,
            "subdoc" => Self::Subdoc,
            "dcp" => Self::Dcp,
            "auto-retry" => Self::AutoRetry,
            "item-locked" => Self::ItemLocked,
            "item-deleted" => Self::ItemDeleted,
            "rate-limit" => Self::RateLimit,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawErrorMapEntry {
    name: String,
    desc: String,
    attrs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawErrorMap {
    errors: HashMap<String, RawErrorMapEntry>,
}

#[derive(Debug, Clone)]
pub struct ErrorMapEntry {
    pub name: String,
    pub description: String,
    pub attributes: Vec<ErrorMapAttribute>,
}

impl ErrorMapEntry {
    pub fn has(&self, attr: ErrorMapAttribute) -> bool {
        self.attributes.contains(&attr)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorMap {
    entries: HashMap<u16, ErrorMapEntry>,
}

impl ErrorMap {
    /// Parses the JSON error map document fetched via GET_ERROR_MAP. Unknown
    /// attribute strings are skipped (forward-compatibility, `spec.md` §6.3).
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawErrorMap = serde_json::from_str(json)?;
        let mut entries = HashMap::with_capacity(raw.errors.len());
        for (code_hex, entry) in raw.errors {
            let Ok(code) = u16::from_str_radix(code_hex.trim_start_matches("0x"), 16) else {
                continue;
            };
            let attributes = entry
                .attrs
                .iter()
                .filter_map(|a| ErrorMapAttribute::parse(a))
                .collect();
            entries.insert(
                code,
                ErrorMapEntry { name: entry.name, description: entry.desc, attributes },
            );
        }
        Ok(ErrorMap { entries })
    }

    pub fn get(&self, status: u16) -> Option<&ErrorMapEntry> {
        self.entries.get(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_attributes_and_ignores_unknown() {
        let json = r#"{
            "errors": {
                "0x86": { "name": "TMPFAIL", "desc": "temp", "attrs": ["temp", "retry-later", "totally-new-attr"] }
            }
        }"#;
        let map = ErrorMap::parse(json).unwrap();
        let entry = map.get(0x86).unwrap();
        assert_eq!(entry.name, "TMPFAIL");
        assert!(entry.has(ErrorMapAttribute::Temp));
        assert!(entry.has(ErrorMapAttribute::RetryLater));
        assert_eq!(entry.attributes.len(), 2);
    }
}
