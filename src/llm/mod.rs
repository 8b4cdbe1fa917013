mod openai;

use crate::types::{Difficulty, Idea, PlayerProfile};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub use openai::OpenAiGenerator;

/// Result type for generation operations
pub type GenResult<T> = Result<T, GenError>;

/// Errors that can occur while talking to the idea generator
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response parsing failed: {0}")]
    ParseError(String),

    #[error("Generator produced no usable ideas")]
    Empty,
}

/// One generated idea before it gets an id and joins the deck.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedIdea {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    pub time_estimate: String,
    pub difficulty: Difficulty,
}

/// Ideas tailored to a single player's profile.
#[derive(Debug, Clone)]
pub struct DeckRequest {
    pub player_name: String,
    pub profile: PlayerProfile,
    /// How many ideas to produce for this player.
    pub count: usize,
    /// Room-wide average scale preference, 1-10.
    pub avg_scale: u8,
}

/// Round-2 enrichment for a finalist card.
#[derive(Debug, Clone, Deserialize)]
pub struct WinnerDetails {
    #[serde(default)]
    pub features: Vec<String>,
    pub risk: String,
    pub pitch: String,
}

impl WinnerDetails {
    /// Placeholder used when enrichment fails, so a flaky generator can
    /// never block the game from reaching Round 2.
    pub fn fallback() -> Self {
        Self {
            features: Vec::new(),
            risk: "N/A".to_string(),
            pitch: "N/A".to_string(),
        }
    }
}

/// Trait the session core generates ideas through
#[async_trait]
pub trait IdeaGenerator: Send + Sync {
    /// Generate project ideas tailored to one player.
    async fn generate_ideas(&self, request: DeckRequest) -> GenResult<Vec<GeneratedIdea>>;

    /// Produce features, risk and pitch for a finalist card.
    async fn enrich_winner(&self, idea: &Idea) -> GenResult<WinnerDetails>;

    /// Get the name of this generator
    fn name(&self) -> &str;
}

/// Configuration for the idea generator
#[derive(Debug, Clone)]
pub struct GenConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// Model to use
    pub model: String,
    /// Timeout for a single generation request
    pub timeout: Duration,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(45),
        }
    }
}

impl GenConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().and_then(|key| {
            let trimmed = key.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let model = std::env::var("OPENAI_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| "gpt-4o-mini".to_string());

        Self {
            openai_api_key,
            model,
            timeout: std::env::var("GEN_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(45)),
        }
    }

    /// Build a generator if one is configured
    pub fn build_generator(&self) -> Option<Arc<dyn IdeaGenerator>> {
        self.openai_api_key.as_ref().map(|api_key| {
            Arc::new(OpenAiGenerator::new(
                api_key.clone(),
                self.model.clone(),
                self.timeout,
            )) as Arc<dyn IdeaGenerator>
        })
    }
}

/// Build the prompt for one player's slice of the deck.
pub(crate) fn deck_prompt(request: &DeckRequest) -> String {
    let profile = &request.profile;
    format!(
        "Generate {count} software project ideas for {name}.\n\
         Skills: {skills}\n\
         Interests: {interests}\n\
         Hobbies: {hobbies}\n\
         Available time: {hours} hours per week\n\
         Project scale: {scale}/10 (1 = tiny script, 10 = startup MVP)\n\n\
         Each idea must be buildable by one small team within the stated time. \
         Mix archetypes (tools, games, web apps, automations, hardware-adjacent) \
         and spread difficulties across easy, medium and hard. \
         Respond with a JSON object {{\"ideas\": [...]}} where each idea has \
         exactly these fields: \"title\" (short, catchy), \"description\" \
         (2-3 sentences), \"tech_stack\" (array of strings), \"time_estimate\" \
         (e.g. \"20 hours\"), \"difficulty\" (one of \"Easy\", \"Medium\", \
         \"Hard\"). No other text.",
        count = request.count,
        name = request.player_name,
        skills = join_or_none(&profile.skills),
        interests = join_or_none(&profile.interests),
        hobbies = join_or_none(&profile.hobbies),
        hours = profile.hours_per_week,
        scale = request.avg_scale,
    )
}

/// Build the enrichment prompt for one finalist card.
pub(crate) fn winner_prompt(idea: &Idea) -> String {
    format!(
        "The project idea \"{title}\" was voted a finalist.\n\
         Description: {description}\n\
         Tech stack: {stack}\n\n\
         Respond with a JSON object with exactly these fields: \"features\" \
         (array of 3-5 concrete MVP feature strings), \"risk\" (one sentence \
         naming the biggest technical risk), \"pitch\" (one punchy elevator \
         pitch sentence). No other text.",
        title = idea.title,
        description = idea.description,
        stack = join_or_none(&idea.tech_stack),
    )
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none listed".to_string()
    } else {
        items.join(", ")
    }
}

/// Strip optional markdown code fences some models wrap JSON in.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[derive(Deserialize)]
struct DeckResponse {
    ideas: Vec<GeneratedIdea>,
}

pub(crate) fn parse_deck_response(text: &str) -> GenResult<Vec<GeneratedIdea>> {
    let response: DeckResponse = serde_json::from_str(strip_fences(text))
        .map_err(|e| GenError::ParseError(e.to_string()))?;
    if response.ideas.is_empty() {
        return Err(GenError::Empty);
    }
    Ok(response.ideas)
}

pub(crate) fn parse_winner_response(text: &str) -> GenResult<WinnerDetails> {
    serde_json::from_str(strip_fences(text)).map_err(|e| GenError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenConfig::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert!(config.build_generator().is_none());
    }

    #[test]
    fn deck_response_parses_with_and_without_fences() {
        let body = r#"{"ideas":[{"title":"CLI habit tracker","description":"Track habits.","tech_stack":["Rust"],"time_estimate":"10 hours","difficulty":"Easy"}]}"#;
        assert_eq!(parse_deck_response(body).unwrap().len(), 1);

        let fenced = format!("```json\n{body}\n```");
        assert_eq!(parse_deck_response(&fenced).unwrap().len(), 1);

        assert!(matches!(
            parse_deck_response(r#"{"ideas":[]}"#).unwrap_err(),
            GenError::Empty
        ));
    }

    #[test]
    fn winner_response_tolerates_missing_features() {
        let details =
            parse_winner_response(r#"{"risk":"Scope creep.","pitch":"Ship it."}"#).unwrap();
        assert!(details.features.is_empty());
        assert_eq!(details.risk, "Scope creep.");
    }

    #[test]
    fn prompts_mention_profile_and_count() {
        let request = DeckRequest {
            player_name: "Alice".to_string(),
            profile: PlayerProfile {
                skills: vec!["Rust".to_string()],
                ..Default::default()
            },
            count: 13,
            avg_scale: 6,
        };
        let prompt = deck_prompt(&request);
        assert!(prompt.contains("13 software project ideas"));
        assert!(prompt.contains("Rust"));
        assert!(prompt.contains("6/10"));
    }
}
