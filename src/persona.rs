//! Persona configuration and lookup
//!
//! A persona is a named response style: system prompt, sampling limits and the
//! short utterance spoken when a turn fails. Personas are plain data selected by
//! id at call time; the built-in table is embedded in the binary and can be
//! extended or overridden by files in the persona directory.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Persona used when none is requested
pub const DEFAULT_PERSONA: &str = "normal";

/// An immutable persona record
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    /// Unique identifier (e.g. "normal", "sassy")
    pub id: String,

    /// Display name
    pub name: String,

    /// Short description for listings
    #[serde(default)]
    pub description: Option<String>,

    /// System prompt sent as the first message
    pub system_prompt: String,

    /// Upper bound on response length in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Spoken when a turn fails after the question was understood
    #[serde(default = "default_error_utterance")]
    pub error_utterance: String,
}

const fn default_max_tokens() -> u32 {
    150
}

const fn default_temperature() -> f32 {
    0.2
}

fn default_error_utterance() -> String {
    "Sorry, I'm having trouble right now.".to_string()
}

/// Embedded persona data compiled into the binary
const EMBEDDED_PERSONAS: &[(&str, &str)] = &[
    ("normal", include_str!("../personas/normal.json")),
    ("sassy", include_str!("../personas/sassy.json")),
];

/// Closed table of personas keyed by id
#[derive(Debug, Clone, Default)]
pub struct PersonaPromptStore {
    personas: BTreeMap<String, PersonaConfig>,
}

impl PersonaPromptStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the embedded personas
    ///
    /// # Errors
    ///
    /// Returns error if embedded persona data fails to parse
    pub fn builtin() -> Result<Self> {
        let mut store = Self::new();
        for (id, json) in EMBEDDED_PERSONAS {
            let persona: PersonaConfig = serde_json::from_str(json)
                .map_err(|e| Error::Config(format!("embedded persona {id}: {e}")))?;
            store.insert(persona);
        }
        Ok(store)
    }

    /// Built-in personas plus any found in `dir`
    ///
    /// # Errors
    ///
    /// Returns error if embedded data or a persona file is invalid
    pub fn load(dir: &Path) -> Result<Self> {
        let mut store = Self::builtin()?;
        store.load_dir(dir)?;
        Ok(store)
    }

    /// Add every persona file in `dir` (JSON preferred, TOML accepted)
    ///
    /// A missing directory is not an error. Files whose id matches an existing
    /// persona replace it.
    ///
    /// # Errors
    ///
    /// Returns error if a persona file cannot be read or parsed
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("json" | "toml")))
            .collect();
        // Reverse order loads JSON after TOML for the same stem, so JSON wins
        paths.sort_by(|a, b| b.cmp(a));

        let mut loaded = 0;
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let persona: PersonaConfig = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => serde_json::from_str(&content).map_err(|e| {
                    Error::Config(format!("failed to parse {}: {e}", path.display()))
                })?,
                _ => toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("failed to parse {}: {e}", path.display()))
                })?,
            };

            tracing::debug!(path = %path.display(), persona = %persona.id, "loaded persona");
            self.insert(persona);
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Insert or replace a persona
    pub fn insert(&mut self, persona: PersonaConfig) {
        self.personas.insert(persona.id.clone(), persona);
    }

    /// Look up a persona by id
    ///
    /// # Errors
    ///
    /// Returns `Error::PersonaNotFound` for unknown ids
    pub fn get(&self, id: &str) -> Result<&PersonaConfig> {
        self.personas
            .get(id)
            .ok_or_else(|| Error::PersonaNotFound(id.to_string()))
    }

    /// System prompt for a persona id
    ///
    /// # Errors
    ///
    /// Returns `Error::PersonaNotFound` for unknown ids
    pub fn system_prompt(&self, id: &str) -> Result<&str> {
        self.get(id).map(|p| p.system_prompt.as_str())
    }

    /// Check whether a persona id is known
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.personas.contains_key(id)
    }

    /// All persona ids in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }

    /// All personas in id order
    pub fn iter(&self) -> impl Iterator<Item = &PersonaConfig> {
        self.personas.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.personas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_normal_and_sassy() {
        let store = PersonaPromptStore::builtin().unwrap();
        assert_eq!(store.ids().collect::<Vec<_>>(), vec!["normal", "sassy"]);

        let normal = store.get("normal").unwrap();
        assert_eq!(normal.max_tokens, 150);
        assert!((normal.temperature - 0.2).abs() < f32::EPSILON);
        assert!(normal.system_prompt.contains("ChefBot"));

        let sassy = store.get("sassy").unwrap();
        assert_eq!(sassy.max_tokens, 100);
        assert!(sassy.error_utterance.contains("genius"));
    }

    #[test]
    fn unknown_persona_is_an_error() {
        let store = PersonaPromptStore::builtin().unwrap();
        assert!(matches!(
            store.get("pirate"),
            Err(Error::PersonaNotFound(id)) if id == "pirate"
        ));
    }

    #[test]
    fn directory_personas_extend_and_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pirate.json"),
            r#"{"id":"pirate","name":"Captain Cook","systemPrompt":"Arr, answer like a pirate."}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("normal.toml"),
            "id = \"normal\"\nname = \"Loud\"\nsystemPrompt = \"Be loud.\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("normal.json"),
            r#"{"id":"normal","name":"Plain","systemPrompt":"Be plain.","maxTokens":60}"#,
        )
        .unwrap();

        let store = PersonaPromptStore::load(dir.path()).unwrap();

        let pirate = store.get("pirate").unwrap();
        assert_eq!(pirate.max_tokens, 150);
        assert_eq!(pirate.error_utterance, "Sorry, I'm having trouble right now.");

        assert_eq!(store.system_prompt("normal").unwrap(), "Be plain.");
        assert_eq!(store.get("normal").unwrap().max_tokens, 60);
        assert!(store.contains("sassy"));
    }

    #[test]
    fn missing_directory_loads_nothing() {
        let mut store = PersonaPromptStore::new();
        let loaded = store.load_dir(Path::new("/nonexistent/personas")).unwrap();
        assert_eq!(loaded, 0);
        assert!(store.is_empty());
    }
}
