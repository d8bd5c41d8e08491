//! Inbound messaging webhook.
//!
//! The POST handler always acknowledges with 200 no matter what happened
//! inside: the provider retries deliveries on failed acknowledgments, so a
//! thrown error here would only produce acknowledgment storms. Internal
//! failures are reported through logs, never through the response.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::AppState;
use crate::command::{self, Command};
use crate::engine::AdvanceOutcome;

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Subscription handshake: echo the challenge when the token matches.
#[utoipa::path(get, path = "/webhook", responses(
    (status = 200, description = "Challenge echoed"),
    (status = 403, description = "Verification failed"),
))]
pub async fn verify(State(state): State<AppState>, Query(params): Query<VerifyParams>) -> Response {
    let subscribe = params.mode.as_deref() == Some("subscribe");
    let token_ok = params.verify_token.as_deref() == Some(state.verify_token.as_str());
    if subscribe && token_ok {
        info!("webhook verified");
        params.challenge.unwrap_or_default().into_response()
    } else {
        warn!("webhook verification failed");
        StatusCode::FORBIDDEN.into_response()
    }
}

/// Inbound event, abstracted from the provider payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub from: String,
    pub text: Option<String>,
    pub button_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<InboundMessage>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    from: String,
    text: Option<TextBody>,
    interactive: Option<Interactive>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct Interactive {
    button_reply: Option<ButtonReply>,
}

#[derive(Debug, Deserialize)]
struct ButtonReply {
    id: String,
}

fn extract_events(payload: serde_json::Value) -> Vec<InboundEvent> {
    let payload: WebhookPayload = match serde_json::from_value(payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("unrecognized webhook payload: {e}");
            return Vec::new();
        }
    };
    payload
        .entry
        .into_iter()
        .flat_map(|e| e.changes)
        .flat_map(|c| c.value.messages)
        .map(|m| InboundEvent {
            from: m.from,
            text: m.text.map(|t| t.body),
            button_id: m.interactive.and_then(|i| i.button_reply).map(|b| b.id),
        })
        .collect()
}

/// Receive inbound messages. Always acknowledged with 200, even for bodies
/// that are not valid JSON, so this handler reads the raw bytes itself and
/// carries no OpenAPI annotation.
pub async fn receive(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    for event in extract_events(payload) {
        handle_event(&state, event).await;
    }
    (StatusCode::OK, "EVENT_RECEIVED").into_response()
}

async fn handle_event(state: &AppState, event: InboundEvent) {
    let cmd = command::classify(event.text.as_deref(), event.button_id.as_deref());
    match cmd {
        Command::Unrecognized => {
            info!(from = %event.from, "ignoring unrecognized inbound message");
        }
        Command::AcceptNext => {
            let tenant = match state.tenants.resolve(&event.from).await {
                Ok(tenant) => tenant,
                Err(e) => {
                    error!(from = %event.from, "tenant resolution failed: {e}");
                    return;
                }
            };
            match state.engine.advance(&event.from).await {
                Ok(AdvanceOutcome::NoActiveEnrollment) => {
                    info!(from = %event.from, tenant_id = tenant.id, "no active enrollment");
                }
                Ok(AdvanceOutcome::Delivered { index, .. }) => {
                    info!(from = %event.from, tenant_id = tenant.id, index, "advanced");
                }
                Ok(AdvanceOutcome::Completed { enrollment_id, .. }) => {
                    info!(from = %event.from, enrollment_id, "course completed");
                }
                Err(e) => {
                    // swallowed: the acknowledgment must still go out
                    error!(from = %event.from, "advance failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_text_message() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messages": [{
                            "from": "15550001111",
                            "type": "text",
                            "text": { "body": "NEXT" }
                        }]
                    }
                }]
            }]
        });
        let events = extract_events(payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, "15550001111");
        assert_eq!(events[0].text.as_deref(), Some("NEXT"));
        assert_eq!(events[0].button_id, None);
    }

    #[test]
    fn extracts_button_reply() {
        let payload = json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "15550001111",
                            "type": "interactive",
                            "interactive": {
                                "type": "button_reply",
                                "button_reply": { "id": "continue", "title": "Continue" }
                            }
                        }]
                    }
                }]
            }]
        });
        let events = extract_events(payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].button_id.as_deref(), Some("continue"));
    }

    #[test]
    fn status_only_payload_yields_no_events() {
        let payload = json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "status": "delivered" }] } }] }]
        });
        assert!(extract_events(payload).is_empty());
    }

    #[test]
    fn garbage_payload_yields_no_events() {
        assert!(extract_events(json!({ "hello": "world" })).is_empty());
        assert!(extract_events(json!(42)).is_empty());
    }
}
