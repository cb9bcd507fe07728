//! Feature records, their section layouts, and prompt construction.
//!
//! Every record is rebuilt from validated [`Sections`], whether the text came
//! fresh from a provider, from the cache, or from the static table.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::llm::{AiRequest, CacheKey, ContentOrigin, FeatureKind};
use crate::sections::{SectionLayout, Sections};

impl FeatureKind {
    /// Section markers the feature's output must carry.
    pub fn layout(&self) -> SectionLayout {
        match self {
            Self::Wisdom => SectionLayout {
                markers: &["WISDOM"],
                bare: Some("WISDOM"),
            },
            Self::Explanation => SectionLayout::required(&["MEANING", "ACTION"]),
            Self::Insight => SectionLayout::required(&["EMOTION", "THEMES", "INSIGHT"]),
            Self::Pattern => SectionLayout::required(&["SUMMARY", "PATTERN", "SUGGESTION"]),
            Self::Vocabulary => SectionLayout::required(&["CONTEXT", "EXAMPLE"]),
            Self::MessageHelper => SectionLayout::required(&["OPENING", "PROMPTS"]),
        }
    }

    /// Instructions placed ahead of the user content.
    pub fn instructions(&self) -> &'static str {
        match self {
            Self::Wisdom => {
                "Write one short piece of wisdom (one or two sentences) to start a \
                 journaling day.\nFormat:\nWISDOM: <text>"
            }
            Self::Explanation => {
                "Explain the quote below in plain words, then suggest one small thing \
                 the reader can do today.\nFormat:\nMEANING: <two or three sentences>\n\
                 ACTION: <one concrete suggestion>"
            }
            Self::Insight => {
                "Read the journal entry below. Name the main emotion, list up to three \
                 themes, and offer one gentle insight. Do not diagnose.\nFormat:\n\
                 EMOTION: <one word>\nTHEMES: <comma-separated>\nINSIGHT: <two sentences>"
            }
            Self::Pattern => {
                "Read this week's journal entries below. Summarize the week, name one \
                 recurring pattern, and suggest one experiment for next week.\nFormat:\n\
                 SUMMARY: <two sentences>\nPATTERN: <one sentence>\nSUGGESTION: <one sentence>"
            }
            Self::Vocabulary => {
                "Explain how the word below is used in everyday writing and give one \
                 example sentence a journaler might write.\nFormat:\nCONTEXT: <one or two \
                 sentences>\nEXAMPLE: <one sentence>"
            }
            Self::MessageHelper => {
                "Help the user write a message to their future self. Suggest an opening \
                 line and three short reflection prompts.\nFormat:\nOPENING: <one sentence>\n\
                 PROMPTS:\n- <prompt>\n- <prompt>\n- <prompt>"
            }
        }
    }
}

/// A journal entry as the features see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub content: String,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl JournalEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mood: None,
            date: None,
        }
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(date) = self.date {
            out.push_str(&format!("Date: {date}\n"));
        }
        if let Some(mood) = &self.mood {
            out.push_str(&format!("Mood: {mood}\n"));
        }
        out.push_str(self.content.trim());
        out
    }
}

/// A quote to explain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
}

impl Quote {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            author: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// The cache key and prompt for one feature call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturePrompt {
    pub kind: FeatureKind,
    /// Input identity, hashed into the cache key.
    pub fingerprint_input: String,
    /// User content appended after the feature instructions.
    pub content: String,
    /// Overrides the repository's retry count for this call.
    pub max_retries: Option<u32>,
}

impl FeaturePrompt {
    pub fn daily_wisdom(date: NaiveDate) -> Self {
        Self {
            kind: FeatureKind::Wisdom,
            fingerprint_input: date.to_string(),
            content: format!("Date: {}", date.format("%A, %B %-d, %Y")),
            max_retries: None,
        }
    }

    pub fn quote_explanation(quote: &Quote) -> Self {
        let attribution = quote
            .author
            .as_deref()
            .map(|a| format!(" ({a})"))
            .unwrap_or_default();
        Self {
            kind: FeatureKind::Explanation,
            fingerprint_input: format!("quote:{}", quote.id),
            content: format!("Quote: \"{}\"{}", quote.text.trim(), attribution),
            max_retries: None,
        }
    }

    pub fn journal_insight(entry: &JournalEntry) -> Self {
        let content = entry.render();
        Self {
            kind: FeatureKind::Insight,
            fingerprint_input: content.clone(),
            content: format!("Journal entry:\n{content}"),
            max_retries: None,
        }
    }

    pub fn weekly_patterns(week_start: NaiveDate, entries: &[JournalEntry]) -> Self {
        let body = entries
            .iter()
            .enumerate()
            .map(|(i, e)| format!("Entry {}:\n{}", i + 1, e.render()))
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            kind: FeatureKind::Pattern,
            fingerprint_input: format!("{week_start}\n{body}"),
            content: format!("Week starting {week_start}\n\n{body}"),
            max_retries: None,
        }
    }

    pub fn vocabulary_context(word: &str, definition: Option<&str>) -> Self {
        let word = word.trim();
        let content = match definition {
            Some(def) => format!("Word: {word}\nDefinition: {}", def.trim()),
            None => format!("Word: {word}"),
        };
        Self {
            kind: FeatureKind::Vocabulary,
            fingerprint_input: word.to_lowercase(),
            content,
            max_retries: None,
        }
    }

    pub fn message_helper(topic: &str) -> Self {
        let topic = topic.trim();
        Self {
            kind: FeatureKind::MessageHelper,
            fingerprint_input: topic.to_lowercase(),
            content: format!("Topic: {topic}"),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Cache key for this call under `persona`.
    pub fn cache_key(&self, persona: &str) -> CacheKey {
        CacheKey::for_content(self.kind, &format!("{persona}\n{}", self.fingerprint_input))
    }

    /// Full prompt: feature instructions followed by the user content.
    pub fn prompt(&self) -> String {
        format!("{}\n\n{}", self.kind.instructions(), self.content)
    }

    /// The provider request for this call under `persona`.
    pub fn to_request(&self, persona: &str) -> AiRequest {
        let request = AiRequest::new(self.kind, persona, self.prompt());
        match self.max_retries {
            Some(n) => request.with_max_retries(n),
            None => request,
        }
    }
}

/// A record the façade builds from a feature's sections.
pub trait FeatureRecord: Sized {
    const KIND: FeatureKind;

    /// Build from sections already validated against `KIND.layout()`.
    fn from_sections(sections: &Sections, origin: ContentOrigin) -> Self;

    fn is_ai_generated(&self) -> bool;
}

fn section(sections: &Sections, marker: &str) -> String {
    sections.get(marker).unwrap_or_default().to_string()
}

/// Drop a leading bullet (`-`, `*`, `•`) or list number (`1.`, `2)`).
fn strip_bullet(item: &str) -> &str {
    let item = item.trim().trim_start_matches(['-', '*', '•']).trim_start();
    let digits = item.len() - item.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(rest) = item[digits..].strip_prefix(['.', ')']) {
            return rest.trim();
        }
    }
    item.trim()
}

fn list_items(text: &str) -> Vec<String> {
    text.split(['\n', ','])
        .map(strip_bullet)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn lines(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWisdom {
    pub text: String,
    pub is_ai_generated: bool,
}

impl FeatureRecord for DailyWisdom {
    const KIND: FeatureKind = FeatureKind::Wisdom;

    fn from_sections(sections: &Sections, origin: ContentOrigin) -> Self {
        Self {
            text: section(sections, "WISDOM"),
            is_ai_generated: origin.is_ai(),
        }
    }

    fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteExplanation {
    pub meaning: String,
    pub action: String,
    pub is_ai_generated: bool,
}

impl FeatureRecord for QuoteExplanation {
    const KIND: FeatureKind = FeatureKind::Explanation;

    fn from_sections(sections: &Sections, origin: ContentOrigin) -> Self {
        Self {
            meaning: section(sections, "MEANING"),
            action: section(sections, "ACTION"),
            is_ai_generated: origin.is_ai(),
        }
    }

    fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalInsight {
    pub emotion: String,
    pub themes: Vec<String>,
    pub insight: String,
    pub is_ai_generated: bool,
}

impl FeatureRecord for JournalInsight {
    const KIND: FeatureKind = FeatureKind::Insight;

    fn from_sections(sections: &Sections, origin: ContentOrigin) -> Self {
        Self {
            emotion: section(sections, "EMOTION"),
            themes: list_items(sections.get("THEMES").unwrap_or_default()),
            insight: section(sections, "INSIGHT"),
            is_ai_generated: origin.is_ai(),
        }
    }

    fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyPatterns {
    pub summary: String,
    pub pattern: String,
    pub suggestion: String,
    pub is_ai_generated: bool,
}

impl FeatureRecord for WeeklyPatterns {
    const KIND: FeatureKind = FeatureKind::Pattern;

    fn from_sections(sections: &Sections, origin: ContentOrigin) -> Self {
        Self {
            summary: section(sections, "SUMMARY"),
            pattern: section(sections, "PATTERN"),
            suggestion: section(sections, "SUGGESTION"),
            is_ai_generated: origin.is_ai(),
        }
    }

    fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyContext {
    pub context: String,
    pub example: String,
    pub is_ai_generated: bool,
}

impl FeatureRecord for VocabularyContext {
    const KIND: FeatureKind = FeatureKind::Vocabulary;

    fn from_sections(sections: &Sections, origin: ContentOrigin) -> Self {
        Self {
            context: section(sections, "CONTEXT"),
            example: section(sections, "EXAMPLE"),
            is_ai_generated: origin.is_ai(),
        }
    }

    fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHelp {
    pub opening: String,
    pub prompts: Vec<String>,
    pub is_ai_generated: bool,
}

impl FeatureRecord for MessageHelp {
    const KIND: FeatureKind = FeatureKind::MessageHelper;

    fn from_sections(sections: &Sections, origin: ContentOrigin) -> Self {
        Self {
            opening: section(sections, "OPENING"),
            prompts: lines(sections.get("PROMPTS").unwrap_or_default()),
            is_ai_generated: origin.is_ai(),
        }
    }

    fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }
}
