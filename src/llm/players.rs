//! Automated players: answer generation and vote picking.

use super::*;
use crate::types::{AnswerContent, AnswerKind, AuthorKind};

/// Stand-in answer when the generator fails or returns nothing usable
pub const FALLBACK_TEXT_ANSWER: &str = "no comment";

pub const FALLBACK_DRAWING_ANSWER: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"><circle cx="50" cy="50" r="30" fill="none" stroke="black" stroke-width="3"/></svg>"#;

const TEXT_ANSWER_INSTRUCTIONS: &str = "Task: Fill in the blank with 1-3 words in a funny and creative way.
Context: Party game. The goal is to entertain.
Format: ONLY provide the missing word(s).
Tone: Playful and imaginative.
Rules:
- Do NOT repeat the sentence.
- Do NOT change the wording of the original sentence.
- Do NOT use quotation marks around your answer.
- Keep the response very brief.
- Give a single answer and do not explain it.";

const DRAWING_ANSWER_INSTRUCTIONS: &str = "Task: Draw the described scene as a simple doodle, the way a person would with a mouse in under a minute.
Format: Reply with ONE complete SVG document (<svg ...>...</svg>) using a 400x400 viewBox and only black strokes.
Rules:
- No text elements.
- No explanations before or after the SVG.";

/// Produces answers for automated participants
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        model_id: &str,
        kind: AnswerKind,
    ) -> LlmResult<AnswerContent>;
}

/// Picks which candidate answer an automated voter believes is of the hunted kind
#[async_trait]
pub trait VoterOracle: Send + Sync {
    /// Returns the raw reply; callers parse it with [`parse_pick`]
    async fn pick_answer(
        &self,
        prompt: &str,
        candidates: &[String],
        model_id: &str,
        target: AuthorKind,
    ) -> LlmResult<String>;
}

pub fn fallback_answer(kind: AnswerKind) -> AnswerContent {
    match kind {
        AnswerKind::Text => AnswerContent::Text(FALLBACK_TEXT_ANSWER.to_string()),
        AnswerKind::Drawing => AnswerContent::Drawing(FALLBACK_DRAWING_ANSWER.to_string()),
    }
}

/// Generate an answer, substituting the placeholder on failure or empty output
pub async fn generate_or_fallback(
    generator: &dyn AnswerGenerator,
    prompt: &str,
    model_id: &str,
    kind: AnswerKind,
) -> AnswerContent {
    match generator.generate(prompt, model_id, kind).await {
        Ok(content) if content.kind() == kind && !content.as_str().trim().is_empty() => content,
        Ok(_) => {
            tracing::warn!(model = model_id, "Generator returned unusable output, using placeholder");
            fallback_answer(kind)
        }
        Err(e) => {
            tracing::warn!(model = model_id, "Answer generation failed: {}, using placeholder", e);
            fallback_answer(kind)
        }
    }
}

/// First integer in the reply, read as a 1-based candidate number
pub fn parse_pick(reply: &str, candidates: usize) -> Option<usize> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    let number: usize = digits.parse().ok()?;
    (1..=candidates).contains(&number).then(|| number - 1)
}

/// Ask the oracle for a pick, falling back to the first candidate
pub async fn pick_or_default(
    oracle: &dyn VoterOracle,
    prompt: &str,
    candidates: &[String],
    model_id: &str,
    target: AuthorKind,
) -> usize {
    match oracle.pick_answer(prompt, candidates, model_id, target).await {
        Ok(reply) => parse_pick(&reply, candidates.len()).unwrap_or_else(|| {
            tracing::warn!(model = model_id, reply = %reply, "Unparseable pick, defaulting to first answer");
            0
        }),
        Err(e) => {
            tracing::warn!(model = model_id, "Vote oracle failed: {}, defaulting to first answer", e);
            0
        }
    }
}

/// The `<svg>...</svg>` element inside a reply, if any
fn extract_svg(reply: &str) -> Option<&str> {
    let start = reply.find("<svg")?;
    let end = reply.rfind("</svg>")? + "</svg>".len();
    (end > start).then(|| &reply[start..end])
}

fn voting_instructions(target: AuthorKind, count: usize) -> String {
    let hunted = match target {
        AuthorKind::Automated => "was generated by an AI",
        AuthorKind::Human => "was written by a human",
    };
    format!(
        "You are playing a party game. Players answered the prompt below and exactly one of the \
         {} numbered answers {}. Decide which one.\nReply with the number of that answer only.",
        count, hunted
    )
}

#[async_trait]
impl AnswerGenerator for LlmManager {
    async fn generate(
        &self,
        prompt: &str,
        model_id: &str,
        kind: AnswerKind,
    ) -> LlmResult<AnswerContent> {
        let (system_prompt, user_prompt, max_tokens) = match kind {
            AnswerKind::Text => (
                TEXT_ANSWER_INSTRUCTIONS,
                format!("Complete this sentence: {}", prompt),
                self.max_tokens(),
            ),
            AnswerKind::Drawing => (
                DRAWING_ANSWER_INSTRUCTIONS,
                format!("Draw: {}", prompt),
                // SVG markup needs far more room than a few words
                self.max_tokens().max(1024),
            ),
        };

        let request = GenerateRequest {
            system_prompt: Some(system_prompt.to_string()),
            prompt: user_prompt,
            max_tokens: Some(max_tokens),
            timeout: self.timeout(),
            model_override: None,
        };

        let (_, response) = self.generate_from_model(model_id, request).await?;

        match kind {
            AnswerKind::Text => Ok(AnswerContent::Text(response.text)),
            AnswerKind::Drawing => extract_svg(&response.text)
                .map(|svg| AnswerContent::Drawing(svg.to_string()))
                .ok_or_else(|| LlmError::ParseError("No SVG element in response".to_string())),
        }
    }
}

#[async_trait]
impl VoterOracle for LlmManager {
    async fn pick_answer(
        &self,
        prompt: &str,
        candidates: &[String],
        model_id: &str,
        target: AuthorKind,
    ) -> LlmResult<String> {
        let listing: Vec<String> = candidates
            .iter()
            .enumerate()
            .map(|(i, answer)| format!("{}. {}", i + 1, answer))
            .collect();

        let request = GenerateRequest {
            system_prompt: Some(voting_instructions(target, candidates.len())),
            prompt: format!("Prompt: {}\n\nAnswers:\n{}", prompt, listing.join("\n")),
            max_tokens: Some(10),
            timeout: self.timeout(),
            model_override: None,
        };

        let (_, response) = self.generate_from_model(model_id, request).await?;
        Ok(response.text)
    }
}
