//! Splits multi-section AI output on `MARKER:` lines.
//!
//! Markers are matched case-insensitively at the start of a line and may be
//! wrapped in markdown emphasis (`**MEANING:**`, `**Meaning**:`) or follow a
//! heading or bullet prefix. Emphasis after the colon is only taken as part
//! of the marker when the marker opened it, so `MEANING: **Patience**` keeps
//! its bold value. An upper-case marker may also follow a sentence on the
//! same line (`MEANING: Start now. ACTION: Walk.`). Lines that look like
//! `Word:` but are not one of the layout's markers stay part of the
//! surrounding section.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::SectionError;

/// Section markers one feature expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionLayout {
    /// Markers in canonical order. All are required unless `bare` is set.
    pub markers: &'static [&'static str],
    /// When set, text without any marker is accepted as this section.
    pub bare: Option<&'static str>,
}

impl SectionLayout {
    pub const fn required(markers: &'static [&'static str]) -> Self {
        Self {
            markers,
            bare: None,
        }
    }

    fn marker_for(&self, label: &str) -> Option<&'static str> {
        let normalized = label.trim().replace([' ', '-'], "_").to_uppercase();
        self.markers.iter().copied().find(|m| *m == normalized)
    }
}

fn marker_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:#+[ \t]*|>[ \t]*|[-*][ \t]+)?(\*{0,2}_{0,2})[ \t]*([A-Za-z][A-Za-z _-]{0,30}?)[ \t]*(\*{0,2}_{0,2})[ \t]*:[ \t]*(\*{0,2}_{0,2})[ \t]*",
        )
        .expect("marker line pattern is valid")
    })
}

fn inline_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[.!?][ \t]+(\*{0,2}([A-Z][A-Z_]{1,30})\*{0,2}[ \t]*:(?:\*\*|__)?[ \t]*)")
            .expect("inline marker pattern is valid")
    })
}

/// Parsed sections in canonical marker order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sections {
    values: Vec<(&'static str, String)>,
}

impl Sections {
    pub fn get(&self, marker: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(m, _)| *m == marker)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a marker the layout guarantees.
    pub fn require(&self, marker: &'static str) -> Result<&str, SectionError> {
        self.get(marker).ok_or(SectionError::MissingSection(marker))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.values.iter().map(|(m, v)| (*m, v.as_str()))
    }
}

/// Split `text` into the sections of `layout`.
pub fn parse_sections(text: &str, layout: &SectionLayout) -> Result<Sections, SectionError> {
    if text.trim().is_empty() {
        return Err(SectionError::Empty);
    }

    // (marker, start of marker line, start of content)
    let mut found: Vec<(&'static str, usize, usize)> = Vec::new();
    for caps in marker_line().captures_iter(text) {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        let Some(marker) = layout.marker_for(label.as_str()) else {
            continue;
        };
        let opened = caps.get(1).is_some_and(|m| !m.is_empty());
        let closed = caps.get(3).is_some_and(|m| !m.is_empty());
        // Emphasis after the colon closes the marker only if the marker opened
        // it and did not close it before the colon.
        let content_start = match caps.get(4) {
            Some(after) if !opened || closed => after.start(),
            _ => whole.end(),
        };
        found.push((marker, whole.start(), content_start));
    }
    for caps in inline_marker().captures_iter(text) {
        let (Some(token), Some(label)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if let Some(marker) = layout.marker_for(label.as_str()) {
            found.push((marker, token.start(), token.end()));
        }
    }
    found.sort_by_key(|(_, start, _)| *start);

    if found.is_empty() {
        if let Some(bare) = layout.bare {
            return Ok(Sections {
                values: vec![(bare, clean(text))],
            });
        }
    }

    let mut raw: Vec<(&'static str, String)> = Vec::new();
    for (i, (marker, _, content_start)) in found.iter().enumerate() {
        let end = found.get(i + 1).map_or(text.len(), |next| next.1);
        let value = clean(&text[*content_start..end]);
        // First occurrence wins.
        if !raw.iter().any(|(m, _)| m == marker) {
            raw.push((*marker, value));
        }
    }

    let mut values = Vec::with_capacity(layout.markers.len());
    for marker in layout.markers {
        match raw.iter().find(|(m, _)| m == marker) {
            Some((_, value)) if value.is_empty() => {
                return Err(SectionError::EmptySection(*marker))
            }
            Some((_, value)) => values.push((*marker, value.clone())),
            None => return Err(SectionError::MissingSection(*marker)),
        }
    }
    Ok(Sections { values })
}

/// Render sections in the canonical `MARKER: value` form.
pub fn render_sections<'a, 'b>(pairs: impl IntoIterator<Item = (&'a str, &'b str)>) -> String {
    pairs
        .into_iter()
        .map(|(marker, value)| format!("{}: {}", marker, value.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn clean(value: &str) -> String {
    let value = value.trim();
    let body = value.trim_end_matches(['*', '_']);
    let tail = &value[body.len()..];
    // A trailing emphasis run the value never opened closes a bold marker line.
    if tail.is_empty() || body.contains(tail) {
        value.to_string()
    } else {
        body.trim_end().to_string()
    }
}
