//! Bundled fallback content served when no provider can answer.
//!
//! Each feature has a small pool of hand-written items. The item for a call
//! is picked from the call's fingerprint, so the same input always gets the
//! same fallback.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::llm::FeatureKind;
use crate::sections::{parse_sections, render_sections, Sections};

const BUNDLED_STATIC_CONTENT: &str = include_str!("../data/static_content.json");

/// Validated static items for every feature.
#[derive(Debug, Clone)]
pub struct StaticContent {
    items: HashMap<FeatureKind, Vec<Sections>>,
}

impl StaticContent {
    /// The table compiled into the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_STATIC_CONTENT)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Parse and validate a table. Every feature needs at least one item, and
    /// every item must carry all of the feature's sections.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<BTreeMap<String, String>>> = serde_json::from_str(json)?;

        let mut items = HashMap::new();
        for kind in FeatureKind::ALL {
            let layout = kind.layout();
            let entries = raw
                .get(kind.as_str())
                .filter(|entries| !entries.is_empty())
                .ok_or_else(|| Error::config(format!("no static content for {kind}")))?;

            let mut parsed = Vec::with_capacity(entries.len());
            for (i, entry) in entries.iter().enumerate() {
                let mut pairs = Vec::with_capacity(layout.markers.len());
                for marker in layout.markers {
                    let value = entry.get(*marker).ok_or_else(|| {
                        Error::config(format!("static {kind}[{i}] is missing {marker}"))
                    })?;
                    pairs.push((*marker, value.as_str()));
                }
                let sections = parse_sections(&render_sections(pairs), &layout)
                    .map_err(|e| Error::config(format!("static {kind}[{i}]: {e}")))?;
                parsed.push(sections);
            }
            items.insert(kind, parsed);
        }

        Ok(Self { items })
    }

    /// The item for `fingerprint`. Stable for a given table.
    pub fn select(&self, kind: FeatureKind, fingerprint: &str) -> &Sections {
        // Every kind holds at least one item; checked in `from_json`.
        let pool = &self.items[&kind];
        &pool[pick(fingerprint, pool.len())]
    }

    /// Canonical section text for the item picked for `fingerprint`.
    pub fn select_text(&self, kind: FeatureKind, fingerprint: &str) -> String {
        render_sections(self.select(kind, fingerprint).iter())
    }

    pub fn len(&self, kind: FeatureKind) -> usize {
        self.items.get(&kind).map_or(0, Vec::len)
    }
}

fn pick(fingerprint: &str, len: usize) -> usize {
    let digest = Sha256::digest(fingerprint.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % len as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_table_covers_every_feature() {
        let content = StaticContent::bundled().unwrap();
        for kind in FeatureKind::ALL {
            assert!(content.len(kind) > 0, "no static content for {kind}");
            let sections = content.select(kind, "anything");
            for marker in kind.layout().markers {
                assert!(sections.get(marker).is_some_and(|v| !v.is_empty()));
            }
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let content = StaticContent::bundled().unwrap();
        for fingerprint in ["a", "b", "2026-10-15", "quote:q-17"] {
            let first = content.select_text(FeatureKind::Explanation, fingerprint);
            let second = content.select_text(FeatureKind::Explanation, fingerprint);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_selection_spreads_across_pool() {
        let content = StaticContent::bundled().unwrap();
        let distinct: std::collections::HashSet<String> = (0..64)
            .map(|n| content.select_text(FeatureKind::Wisdom, &format!("day-{n}")))
            .collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_missing_feature_is_rejected() {
        let json = r#"{"wisdom": [{"WISDOM": "Only this."}]}"#;
        assert!(matches!(
            StaticContent::from_json(json),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_item_missing_section_is_rejected() {
        let mut table: serde_json::Value =
            serde_json::from_str(BUNDLED_STATIC_CONTENT).unwrap();
        table["explanation"][0]
            .as_object_mut()
            .unwrap()
            .remove("ACTION");
        let err = StaticContent::from_json(&table.to_string()).unwrap_err();
        assert!(err.to_string().contains("missing ACTION"));
    }
}
