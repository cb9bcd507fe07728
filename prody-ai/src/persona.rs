//! Persona table: persona id → system template and tone rules.
//!
//! Personas are data. The bundled table is compiled in from
//! `data/personas.json`; an app can load its own table from a file at startup.
//! Adding a persona never requires a code change.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const BUNDLED_PERSONAS: &str = include_str!("../data/personas.json");

/// A named tone/style applied to every prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub system_template: String,
    #[serde(default)]
    pub tone_rules: Vec<String>,
}

impl Persona {
    /// System instruction sent in the provider's system slot.
    pub fn system_instruction(&self) -> String {
        if self.tone_rules.is_empty() {
            return self.system_template.clone();
        }
        let mut out = self.system_template.clone();
        out.push_str("\n\nTone:");
        for rule in &self.tone_rules {
            out.push_str("\n- ");
            out.push_str(rule);
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    default_persona: String,
    personas: Vec<Persona>,
}

/// Lookup table of personas with a guaranteed default.
#[derive(Debug, Clone)]
pub struct PersonaTable {
    default: Persona,
    personas: HashMap<String, Persona>,
}

impl PersonaTable {
    /// The table compiled into the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_PERSONAS)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: PersonaFile = serde_json::from_str(json)?;
        let personas: HashMap<String, Persona> = file
            .personas
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let default = personas.get(&file.default_persona).cloned().ok_or_else(|| {
            Error::config(format!(
                "default persona '{}' is not defined",
                file.default_persona
            ))
        })?;

        Ok(Self { default, personas })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Persona by id; unknown ids resolve to the default persona.
    pub fn get(&self, id: &str) -> &Persona {
        self.personas.get(id).unwrap_or(&self.default)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.personas.contains_key(id)
    }

    pub fn default_id(&self) -> &str {
        &self.default.id
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }
}
