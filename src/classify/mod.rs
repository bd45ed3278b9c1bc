//! Threat classification: verdict model, the external classifier client, and
//! the single-flight queue feeding it.
//!
//! The classifier judges relevance and risk for the town of Smila; recent
//! relevant posts are supplied as timestamped context lines so it can spot
//! trajectory changes and duplicates across channels.

pub mod queue;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// "high" -> "High", for the push payload.
    pub fn capitalized(&self) -> &'static str {
        match self {
            RiskLevel::None => "None",
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    CruiseMissile,
    Ballistic,
    Drone,
    Unknown,
}

/// Structured classifier output. The wire schema is strict: all fields
/// required, nothing extra accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Verdict {
    pub relevant: bool,
    pub risk_level: RiskLevel,
    pub threat_type: ThreatType,
    pub location_match: Vec<String>,
    pub trajectory_threat: bool,
    pub reason: String,
    pub summary: String,
    pub language: String,
}

impl Verdict {
    /// True when this verdict should be remembered as context for later calls.
    pub fn is_storable(&self) -> bool {
        self.relevant && self.risk_level != RiskLevel::None
    }
}

/// System instruction for the classifier. Geography and de-duplication rules
/// live here, not in code.
pub const SYSTEM_PROMPT: &str = r#"You are a threat analysis system. Your main goal is to determine whether a Ukrainian-language message describes an actual or potential missile or drone threat to the city of Smila (Смела/Сміла) in Ukraine.

You also receive recent context messages from different channels.
Use them to understand if the current message is part of an ongoing wave of threats, changes in trajectory, or just noise.

If context suggests that the threat is moving toward Черкассы (Черкаси) / Смела (Сміла) even if the current message is ambiguous, treat it as potentially relevant.

General principles:
  - User messages are always in Ukrainian (most often) or Russian (less frequent).
  - The current message is ALWAYS the primary source for analysis.
  - The fields "threat_type", "reason", and "summary" MUST describe the CURRENT message.
  - If there is any conflict between context and the current message, ALWAYS give priority to the current message.
  - Output must be ONLY valid JSON.
  - The reason field MUST be in Russian.
  - Include a short summary suitable for sending as a push notification. It must be concise, clear, and written in Russian.

Priority rules:
1. Smila is the primary focus.
2. Cherkasy is 30 km from Smila. Any threat moving toward Cherkasy is highly relevant for Smila.
3. The Cherkasy region is relevant only as a transit zone.

RELEVANCE GUIDELINES:

Always relevant (even if location is far):
- Any mention of cruise missiles (КР, Х-101, Х-55, Х-22, Х-32, Калібр).
- Any mention of strategic aviation (Ту-95, Ту-160, Ту-22) taking off or airborne.

Likely relevant:
- Any missile or drone moving through central Ukraine.
- Movement through Vinnytsia or Kirovohrad regions.
- Movement of cruise missiles through Mykolaiv region (typical trajectory toward central Ukraine).

Usually NOT relevant:
- Movement toward Kyiv, Brovary, or generally north.
- Activity only in western Ukraine (Lviv, Volyn, Zakarpattia), unless direction changes toward central Ukraine.
- Activity in Kyiv city or immediate surroundings.

Distance rules (explicit):
- Anything within 120 km of Smila is ALWAYS relevant or potentially relevant.
- 100-250 km: relevant if the object is moving toward Cherkasy region.
- More than 250 km: relevant only for cruise missiles, strategic aviation, or clear movement toward central Ukraine.

If uncertain, set relevant: true and use risk_level: 'low' with a clear explanation in reason.

ANTI-DUPLICATE / EVENT DE-DUPING RULES (STRICT):
You may receive multiple short posts from different channels describing the same event within minutes.

Step 1 — Compare CURRENT message to RECENT CONTEXT messages only.
Step 2 — If the CURRENT message matches an earlier context message about the same event AND adds no meaningful new information, you MUST treat it as a duplicate.

If DUPLICATE:
- Set "relevant": false
- Set "risk_level": "none""#;

/// JSON schema enforced via the provider's structured-output mode.
pub fn verdict_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "relevant": { "type": "boolean" },
            "risk_level": { "type": "string", "enum": ["none", "low", "medium", "high"] },
            "threat_type": { "type": "string", "enum": ["cruise_missile", "ballistic", "drone", "unknown"] },
            "location_match": { "type": "array", "items": { "type": "string" } },
            "trajectory_threat": { "type": "boolean" },
            "reason": { "type": "string" },
            "summary": { "type": "string" },
            "language": { "type": "string", "enum": ["ru"] }
        },
        "required": [
            "relevant", "risk_level", "threat_type", "location_match",
            "trajectory_threat", "reason", "summary", "language"
        ]
    })
}

/// External classification service. `context` holds timestamped prior posts
/// (oldest first), `current` the timestamped new post.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn analyze(&self, context: &[String], current: &str) -> Result<Verdict>;
}

/// OpenAI Chat Completions client with schema-constrained responses.
pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("air-raid-monitor/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    /// Override the API endpoint (tests point this at a local stub).
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn analyze(&self, context: &[String], current: &str) -> Result<Verdict> {
        if self.api_key.is_empty() {
            return Err(anyhow!("classifier API key is empty"));
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let mut messages = vec![Msg {
            role: "system",
            content: SYSTEM_PROMPT,
        }];
        for line in context {
            messages.push(Msg {
                role: "user",
                content: line,
            });
        }
        messages.push(Msg {
            role: "user",
            content: current,
        });

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "ThreatAnalysis",
                    "strict": true,
                    "schema": verdict_schema(),
                }
            }
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("classifier request failed")?
            .error_for_status()
            .context("classifier returned error status")?;

        let parsed: Resp = resp.json().await.context("classifier response not JSON")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("classifier response had no choices"))?;

        serde_json::from_str::<Verdict>(content).context("verdict did not match schema")
    }
}
