//! Network backends: an LLM classifier speaking the Messages API shape and a
//! JSON webhook publisher.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use watchpost_core::Classification;

use crate::backends::keyword::NO_MATCH_LABEL;
use crate::collab::{payload_text, Classifier, PublishRequest, Publisher};
use crate::error::{CollabResult, CollaboratorError};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 200;

// ---------------------------------------------------------------------------
// HttpClassifier
// ---------------------------------------------------------------------------

pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    label: String,
    instructions: String,
}

/// Reply shape requested from the model.
#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(alias = "is_match", alias = "is_injury")]
    matches: bool,
    confidence: f64,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl HttpClassifier {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        label: impl Into<String>,
        instructions: Option<String>,
    ) -> Self {
        let label = label.into();
        let instructions = instructions.unwrap_or_else(|| default_instructions(&label));
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            label,
            instructions,
        }
    }

    fn prompt(&self, text: &str) -> String {
        format!(
            "{}\n\nPost: \"{text}\"\n\nRespond with ONLY a JSON object (no other text):\n\
             {{\"matches\": true or false, \"confidence\": 0.0 to 1.0, \
             \"summary\": \"brief explanation\"}}",
            self.instructions
        )
    }

    async fn call(&self, payload: &Value) -> CollabResult<Classification> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0.3,
            "messages": [{"role": "user", "content": self.prompt(&payload_text(payload))}],
        });
        let mut req = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let reply: MessagesReply = resp.json().await?;
        let text = reply
            .content
            .iter()
            .find_map(|b| b.text.as_deref())
            .ok_or_else(|| CollaboratorError::InvalidResponse("no text block in reply".into()))?;
        let verdict = parse_verdict(text)?;
        debug!(matches = verdict.matches, confidence = verdict.confidence, "classifier verdict");

        let label = if verdict.matches {
            self.label.as_str()
        } else {
            NO_MATCH_LABEL
        };
        let mut c = Classification::new(label, verdict.confidence);
        c.summary = verdict.summary;
        Ok(c)
    }
}

fn default_instructions(label: &str) -> String {
    format!(
        "You are screening posts from a monitored news account. Decide whether the \
         post reports {label} news. Be liberal: any direct mention counts."
    )
}

/// Models sometimes wrap the object in prose or code fences; take the
/// outermost `{...}`.
fn parse_verdict(text: &str) -> CollabResult<Verdict> {
    let start = text.find('{');
    let end = text.rfind('}');
    let slice = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => {
            return Err(CollaboratorError::InvalidResponse(format!(
                "no JSON object in reply: {text}"
            )))
        }
    };
    serde_json::from_str(slice).map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
}

impl Classifier for HttpClassifier {
    fn label(&self) -> &str {
        &self.label
    }

    fn classify<'a>(&'a self, payload: &'a Value) -> BoxFuture<'a, CollabResult<Classification>> {
        self.call(payload).boxed()
    }
}

// ---------------------------------------------------------------------------
// WebhookPublisher
// ---------------------------------------------------------------------------

pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookPublisher {
    pub fn new(client: reqwest::Client, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            token,
        }
    }

    async fn post(&self, request: &PublishRequest) -> CollabResult<String> {
        let mut req = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let reply: Value = resp.json().await?;
        match reply.get("id") {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(CollaboratorError::InvalidResponse(format!(
                "publish reply has no id: {reply}"
            ))),
        }
    }
}

impl Publisher for WebhookPublisher {
    fn publish<'a>(&'a self, request: &'a PublishRequest) -> BoxFuture<'a, CollabResult<String>> {
        self.post(request).boxed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with(text: &str) -> String {
        json!({"content": [{"type": "text", "text": text}]}).to_string()
    }

    #[tokio::test]
    async fn classifier_parses_verdict_from_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "k-123")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply_with(
                "Here you go:\n{\"is_injury\": true, \"confidence\": 0.92, \"summary\": \"ankle sprain\"}",
            ))
            .create_async()
            .await;

        let classifier = HttpClassifier::new(
            reqwest::Client::new(),
            format!("{}/v1/messages", server.url()),
            "screening-model",
            Some("k-123".into()),
            "injury",
            None,
        );
        let c = classifier
            .classify(&json!({"text": "Herro (ankle sprain) will miss 2 weeks"}))
            .await
            .unwrap();
        assert_eq!(c.label, "injury");
        assert_eq!(c.confidence, 0.92);
        assert_eq!(c.summary.as_deref(), Some("ankle sprain"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn classifier_non_match_and_errors() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("POST", "/ok")
            .with_status(200)
            .with_body(reply_with(r#"{"matches": false, "confidence": 0.8}"#))
            .create_async()
            .await;
        let _down = server
            .mock("POST", "/down")
            .with_status(529)
            .with_body("overloaded")
            .create_async()
            .await;
        let _junk = server
            .mock("POST", "/junk")
            .with_status(200)
            .with_body(reply_with("I cannot answer that."))
            .create_async()
            .await;

        let make = |path: &str| {
            HttpClassifier::new(
                reqwest::Client::new(),
                format!("{}{path}", server.url()),
                "m",
                None,
                "injury",
                Some("Is this injury news?".into()),
            )
        };
        let payload = json!("Heat sign rookie");

        let c = make("/ok").classify(&payload).await.unwrap();
        assert_eq!(c.label, NO_MATCH_LABEL);

        let err = make("/down").classify(&payload).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected { status: 529, .. }));

        let err = make("/junk").classify(&payload).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn webhook_returns_id_and_sends_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/post")
            .match_header("authorization", "Bearer s3cret")
            .match_body(mockito::Matcher::PartialJson(json!({
                "kind": "injury-watch",
                "source_id": "1870001"
            })))
            .with_status(201)
            .with_body(r#"{"id": 99812}"#)
            .create_async()
            .await;

        let publisher = WebhookPublisher::new(
            reqwest::Client::new(),
            format!("{}/post", server.url()),
            Some("s3cret".into()),
        );
        let request = PublishRequest {
            kind: "injury-watch".into(),
            source_id: "1870001".into(),
            scope: "shams".into(),
            body: json!({"text": "repost"}),
        };
        assert_eq!(publisher.publish(&request).await.unwrap(), "99812");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_rejection_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/post")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;
        let publisher =
            WebhookPublisher::new(reqwest::Client::new(), format!("{}/post", server.url()), None);
        let request = PublishRequest {
            kind: "k".into(),
            source_id: "1".into(),
            scope: "s".into(),
            body: Value::Null,
        };
        let err = publisher.publish(&request).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected { status: 429, .. }));
    }
}
