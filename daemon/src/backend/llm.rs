//! Text-LLM backed classifier and interpreter
//!
//! Both services share one endpoint that takes a chat-style message list and
//! answers with `{"completion": "..."}`. The completion is expected to hold a
//! single JSON object; prose or code fences around it are tolerated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    BackendError, CommandInterpreter, CommandLabel, GestureLabel, GestureReading,
    ImageClassifier, VoiceCommand,
};

const GESTURE_PROMPT: &str = r#"You are a hand gesture recognition AI for a calling app. Analyze the image and detect:

1. Is there a hand visible? (yes/no)
2. What gesture is being made?

Gestures to detect:
- "call": pointing finger (index finger extended)
- "hangup": open palm (all fingers extended)
- "save": thumbs up
- "delete": closed fist
- "none": no clear gesture or no hand

Respond with JSON only: {"hand_detected": true/false, "gesture": "call|hangup|save|delete|none"}

Be strict - only detect clear, obvious gestures. If unsure, return "none" and hand_detected false."#;

const COMMAND_PROMPT: &str = r#"You interpret spoken commands for a phone dialer. Map the transcript to exactly one command.

Commands:
- "call": place a call; params is the contact name or the phone number spoken
- "save": save the current number as a contact; params is a number if one was spoken, else ""
- "delete": delete the number being dialed; params is ""
- "block": block the current caller; params is ""
- "none": anything else

Examples:
"Call John" -> {"command": "call", "params": "John"}
"Call 555-1234" -> {"command": "call", "params": "555-1234"}
"Save this contact" -> {"command": "save", "params": ""}
"Delete this number" -> {"command": "delete", "params": ""}
"Block this caller" -> {"command": "block", "params": ""}

Respond with JSON only: {"command": "call|save|delete|block|none", "params": "..."}"#;

#[derive(Serialize)]
struct LlmRequest<'a> {
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentPart<'a> {
    Text { text: &'a str },
    Image { image: String },
}

#[derive(Deserialize)]
struct LlmResponse {
    completion: String,
}

#[derive(Deserialize)]
struct RawReading {
    hand_detected: bool,
    #[serde(default)]
    gesture: String,
}

#[derive(Deserialize)]
struct RawCommand {
    command: String,
    #[serde(default)]
    params: Option<String>,
}

/// HTTP client for the text-LLM endpoint
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl LlmClient {
    /// Create a client whose requests are bounded by `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            timeout,
        })
    }

    /// Send a system prompt plus user content and return the raw completion
    async fn complete(
        &self,
        system: &str,
        user: MessageContent<'_>,
    ) -> Result<String, BackendError> {
        let body = LlmRequest {
            messages: vec![
                Message {
                    role: "system",
                    content: MessageContent::Text(system),
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!("status {status}: {text}")));
        }

        let parsed: LlmResponse = resp
            .json()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        debug!(len = parsed.completion.len(), "llm completion received");
        Ok(parsed.completion)
    }
}

/// Map a reqwest failure onto the backend error taxonomy
pub(super) fn map_request_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else if err.is_decode() {
        BackendError::MalformedResponse(err.to_string())
    } else {
        BackendError::Unavailable(err.to_string())
    }
}

/// Pull the outermost JSON object out of a completion
fn extract_json(completion: &str) -> Result<&str, BackendError> {
    let start = completion.find('{');
    let end = completion.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&completion[start..=end]),
        _ => Err(BackendError::MalformedResponse(format!(
            "no JSON object in completion: {completion:?}"
        ))),
    }
}

fn parse_reading(completion: &str) -> Result<GestureReading, BackendError> {
    let raw: RawReading = serde_json::from_str(extract_json(completion)?)
        .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

    let gesture = if raw.hand_detected {
        GestureLabel::from_label(&raw.gesture)
    } else {
        GestureLabel::None
    };
    Ok(GestureReading::new(raw.hand_detected, gesture))
}

fn parse_command(completion: &str) -> Result<VoiceCommand, BackendError> {
    let raw: RawCommand = serde_json::from_str(extract_json(completion)?)
        .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

    Ok(VoiceCommand::new(
        CommandLabel::from_label(&raw.command),
        raw.params.unwrap_or_default(),
    ))
}

/// Gesture classifier backed by the LLM endpoint
pub struct LlmGestureClassifier {
    client: Arc<LlmClient>,
}

impl LlmGestureClassifier {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageClassifier for LlmGestureClassifier {
    async fn classify(&self, frame: &[u8]) -> Result<GestureReading, BackendError> {
        let image = base64::engine::general_purpose::STANDARD.encode(frame);
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "Analyze this image for hand gestures:",
            },
            ContentPart::Image { image },
        ]);

        let completion = self.client.complete(GESTURE_PROMPT, content).await?;
        parse_reading(&completion)
    }
}

/// Command interpreter backed by the LLM endpoint
pub struct LlmCommandInterpreter {
    client: Arc<LlmClient>,
}

impl LlmCommandInterpreter {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandInterpreter for LlmCommandInterpreter {
    async fn interpret(&self, transcript: &str) -> Result<VoiceCommand, BackendError> {
        let completion = self
            .client
            .complete(COMMAND_PROMPT, MessageContent::Text(transcript))
            .await?;
        parse_command(&completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading_plain() {
        let reading = parse_reading(r#"{"hand_detected": true, "gesture": "call"}"#).unwrap();
        assert_eq!(reading, GestureReading::new(true, GestureLabel::Call));
    }

    #[test]
    fn test_parse_reading_fenced() {
        let completion = "```json\n{\"hand_detected\": true, \"gesture\": \"Delete\"}\n```";
        let reading = parse_reading(completion).unwrap();
        assert_eq!(reading.gesture, GestureLabel::Delete);
    }

    #[test]
    fn test_parse_reading_no_hand_forces_none() {
        let reading = parse_reading(r#"{"hand_detected": false, "gesture": "save"}"#).unwrap();
        assert_eq!(reading, GestureReading::new(false, GestureLabel::None));
    }

    #[test]
    fn test_parse_reading_malformed() {
        assert!(matches!(
            parse_reading("I see a hand"),
            Err(BackendError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_reading(r#"{"gesture": "call"}"#),
            Err(BackendError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_command() {
        let cmd = parse_command(r#"{"command": "call", "params": "555-1234"}"#).unwrap();
        assert_eq!(cmd, VoiceCommand::new(CommandLabel::Call, "555-1234"));

        let cmd = parse_command(r#"Sure: {"command": "block", "params": ""}"#).unwrap();
        assert_eq!(cmd, VoiceCommand::bare(CommandLabel::Block));
    }

    #[test]
    fn test_image_part_serialization() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "look" },
            ContentPart::Image {
                image: "AAAA".to_string(),
            },
        ]);
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains(r#""type":"text""#));
        assert!(json.contains(r#""type":"image""#));
        assert!(json.contains(r#""image":"AAAA""#));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let client = LlmClient::new("http://127.0.0.1:9/llm", Duration::from_secs(2)).unwrap();
        let interpreter = LlmCommandInterpreter::new(Arc::new(client));
        let err = interpreter.interpret("call john").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Unavailable(_) | BackendError::Timeout(_)
        ));
    }
}
