use rand::seq::SliceRandom;
use std::path::Path;

use crate::error::{GameError, GameResult};
use crate::types::AnswerKind;

const TEXT_PROMPTS: &[&str] = &[
    "If life gives you lemons, make _____",
    "Never bring a _____ to a pillow fight",
    "The early bird catches the _____",
    "A watched _____ never boils",
    "Don't count your _____ before they hatch",
    "Actions speak louder than _____",
    "An apple a day keeps the _____ away",
    "Curiosity killed the _____",
    "You can't teach an old dog new _____",
    "Every cloud has a _____ lining",
    "The grass is always greener on the other _____",
    "Too many cooks spoil the _____",
];

const DRAWING_PROMPTS: &[&str] = &[
    "A penguin having a beach party",
    "Superhero having a bad hair day",
    "Pizza delivering alien",
    "Dancing vegetables",
    "Robot learning to ride a bicycle",
    "Time-traveling dinosaur",
    "A cat running for mayor",
    "Snowman on summer vacation",
    "Octopus playing the drums",
    "A haunted vending machine",
];

/// Pool of prompt texts that games draw from, one pool per answer kind
#[derive(Debug, Clone)]
pub struct PromptDeck {
    text: Vec<String>,
    drawing: Vec<String>,
}

impl Default for PromptDeck {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptDeck {
    pub fn builtin() -> Self {
        Self {
            text: TEXT_PROMPTS.iter().map(|s| s.to_string()).collect(),
            drawing: DRAWING_PROMPTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn new(text: Vec<String>, drawing: Vec<String>) -> Self {
        Self { text, drawing }
    }

    /// One prompt per line. Blank lines and `#` comments are skipped.
    pub fn parse_lines(contents: &str) -> Vec<String> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Replace the text prompts with the ones listed in a file
    pub fn load_text_prompts(mut self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        self.text = Self::parse_lines(&contents);
        Ok(self)
    }

    /// Built-in deck, with text prompts from `GENUINE_PROMPTS_FILE` when set
    pub fn from_env() -> Self {
        let deck = Self::builtin();
        let Some(path) = std::env::var("GENUINE_PROMPTS_FILE")
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
        else {
            return deck;
        };

        match deck.clone().load_text_prompts(&path) {
            Ok(loaded) => {
                tracing::info!("Loaded {} text prompts from {}", loaded.text.len(), path);
                loaded
            }
            Err(e) => {
                tracing::warn!("Failed to read prompts from {}: {}, using built-in", path, e);
                deck
            }
        }
    }

    fn pool(&self, kind: AnswerKind) -> &[String] {
        match kind {
            AnswerKind::Text => &self.text,
            AnswerKind::Drawing => &self.drawing,
        }
    }

    pub fn len(&self, kind: AnswerKind) -> usize {
        self.pool(kind).len()
    }

    /// Draw `count` distinct prompts in random order
    pub fn draw(&self, kind: AnswerKind, count: usize) -> GameResult<Vec<String>> {
        let pool = self.pool(kind);
        if pool.len() < count {
            return Err(GameError::NotEnoughPrompts {
                needed: count,
                available: pool.len(),
            });
        }

        let mut drawn = pool.to_vec();
        drawn.shuffle(&mut rand::rng());
        drawn.truncate(count);
        Ok(drawn)
    }
}
