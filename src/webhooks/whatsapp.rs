//! WhatsApp webhook handler
//!
//! Implements the Meta Business API webhook protocol: the GET
//! subscribe/challenge handshake, envelope parsing to extract the sender
//! and a single text body, `/workflow rest` command parsing, and replies
//! chunked to the platform's message length limit.

use serde_json::{json, Value};
use tracing::{debug, warn};

/// WhatsApp message length limit.
pub const MAX_MESSAGE_LEN: usize = 4096;

const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v17.0";

/// Handler for one WhatsApp Business phone number.
pub struct WhatsAppHandler {
    phone_id: String,
    access_token: String,
    verify_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl WhatsAppHandler {
    pub fn new(
        phone_id: impl Into<String>,
        access_token: impl Into<String>,
        verify_token: impl Into<String>,
    ) -> Self {
        Self {
            phone_id: phone_id.into(),
            access_token: access_token.into(),
            verify_token: verify_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Build from `WHATSAPP_PHONE_ID`, `WHATSAPP_ACCESS_TOKEN`, and
    /// `WHATSAPP_VERIFY_TOKEN`; `None` unless all three are set.
    pub fn from_env() -> Option<Self> {
        let phone_id = std::env::var("WHATSAPP_PHONE_ID").ok()?;
        let access_token = std::env::var("WHATSAPP_ACCESS_TOKEN").ok()?;
        let verify_token = std::env::var("WHATSAPP_VERIFY_TOKEN").ok()?;
        Some(Self::new(phone_id, access_token, verify_token))
    }

    /// Override the Graph API base URL (tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Meta's subscribe handshake: echo the challenge when the mode and
    /// token match.
    pub fn verify(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        if mode == "subscribe" && token == self.verify_token {
            Some(challenge.to_string())
        } else {
            None
        }
    }

    /// Sender phone number from a webhook envelope.
    pub fn extract_sender(payload: &Value) -> Option<String> {
        Self::first_message(payload)?
            .get("from")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Text body from a webhook envelope.
    pub fn extract_text(payload: &Value) -> Option<String> {
        Self::first_message(payload)?
            .get("text")?
            .get("body")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    fn first_message(payload: &Value) -> Option<&Value> {
        payload
            .get("entry")?
            .get(0)?
            .get("changes")?
            .get(0)?
            .get("value")?
            .get("messages")?
            .get(0)
    }

    /// Send a text message, splitting into chunks at the length limit.
    /// Failures are logged; replies are best-effort.
    pub async fn send_message(&self, to: &str, text: &str) {
        for chunk in chunk_message(text) {
            let url = format!("{}/{}/messages", self.api_base, self.phone_id);
            let body = json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": {"body": chunk},
            });
            match self
                .http
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!(to, "WhatsApp reply sent");
                }
                Ok(response) => {
                    warn!(to, status = %response.status(), "WhatsApp reply rejected");
                }
                Err(e) => {
                    warn!(to, error = %e, "WhatsApp reply failed");
                }
            }
        }
    }
}

/// Parse a `/workflow_name rest` command. The rest becomes the
/// workflow's input text; both parts must be non-empty.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    let stripped = text.strip_prefix('/')?;
    let (name, rest) = match stripped.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (stripped, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), rest.to_string()))
}

/// Split a message into chunks no longer than the platform limit,
/// respecting character boundaries.
pub fn chunk_message(text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if current.chars().count() >= MAX_MESSAGE_LEN {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(from: &str, body: &str) -> Value {
        json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": from,
                            "text": {"body": body},
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn test_verify_handshake() {
        let handler = WhatsAppHandler::new("123", "token", "verify-me");
        assert_eq!(
            handler.verify("subscribe", "verify-me", "42"),
            Some("42".to_string())
        );
        assert_eq!(handler.verify("subscribe", "wrong", "42"), None);
        assert_eq!(handler.verify("unsubscribe", "verify-me", "42"), None);
    }

    #[test]
    fn test_envelope_extraction() {
        let payload = envelope("15551234567", "/article_writer AI Safety");
        assert_eq!(
            WhatsAppHandler::extract_sender(&payload).as_deref(),
            Some("15551234567")
        );
        assert_eq!(
            WhatsAppHandler::extract_text(&payload).as_deref(),
            Some("/article_writer AI Safety")
        );
    }

    #[test]
    fn test_extraction_handles_empty_envelopes() {
        assert!(WhatsAppHandler::extract_sender(&json!({})).is_none());
        assert!(WhatsAppHandler::extract_text(&json!({"entry": []})).is_none());

        let status_only = json!({
            "entry": [{"changes": [{"value": {"statuses": [{"id": "x"}]}}]}]
        });
        assert!(WhatsAppHandler::extract_text(&status_only).is_none());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("/article_writer AI Safety"),
            Some(("article_writer".to_string(), "AI Safety".to_string()))
        );
        assert_eq!(
            parse_command("/status"),
            Some(("status".to_string(), String::new()))
        );
        assert_eq!(parse_command("hello there"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn test_chunking_respects_limit() {
        let short = chunk_message("hello");
        assert_eq!(short, vec!["hello".to_string()]);

        let long = "x".repeat(MAX_MESSAGE_LEN * 2 + 10);
        let chunks = chunk_message(&long);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_LEN));
        assert_eq!(chunks.iter().map(String::len).sum::<usize>(), long.len());
    }

    #[test]
    fn test_chunking_multibyte_safe() {
        let text = "é".repeat(MAX_MESSAGE_LEN + 5);
        let chunks = chunk_message(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chars().count(), 5);
    }

    #[tokio::test]
    async fn test_send_message_hits_graph_api() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": []})))
            .expect(1)
            .mount(&server)
            .await;

        let handler =
            WhatsAppHandler::new("123", "token", "verify").with_api_base(server.uri());
        handler.send_message("15551234567", "hello").await;
    }
}
