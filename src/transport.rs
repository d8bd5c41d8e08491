//! Outbound message transport.
//!
//! The engine only depends on the [`Transport`] trait; the shipped
//! implementation talks to the WhatsApp Cloud API and degrades to a
//! simulated mode when credentials are absent, which keeps local development
//! and tests free of real sends.

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v17.0";

// Provider-imposed limits on interactive button messages.
const MAX_BUTTONS: usize = 3;
const MAX_BUTTON_TITLE: usize = 20;
const MAX_FOOTER: usize = 60;
const MAX_BODY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ButtonOptions {
    pub footer: Option<String>,
}

/// Outcome of a send attempt. Failures are values, never errors: the engine
/// records delivery regardless of transport outcome and only surfaces the
/// distinction for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Simulated,
    Failed(String),
}

impl SendOutcome {
    /// Simulated counts as sent for progression purposes.
    pub fn is_sent(&self) -> bool {
        !matches!(self, SendOutcome::Failed(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, phone: &str, body: &str) -> SendOutcome;

    async fn send_with_buttons(
        &self,
        phone: &str,
        body: &str,
        buttons: &[Button],
        options: &ButtonOptions,
    ) -> SendOutcome;
}

/// WhatsApp Cloud API transport. Runs simulated when either credential is
/// missing from the environment.
pub struct WhatsAppTransport {
    http: reqwest::Client,
    access_token: Option<String>,
    phone_id: Option<String>,
}

impl WhatsAppTransport {
    pub fn new(access_token: Option<String>, phone_id: Option<String>) -> Self {
        if access_token.is_none() || phone_id.is_none() {
            warn!(
                "WHATSAPP_ACCESS_TOKEN / WHATSAPP_PHONE_ID not set, \
                 transport runs in simulation mode"
            );
        }
        Self {
            http: reqwest::Client::new(),
            access_token,
            phone_id,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            dotenvy::var("WHATSAPP_ACCESS_TOKEN").ok(),
            dotenvy::var("WHATSAPP_PHONE_ID").ok(),
        )
    }

    async fn post_message(&self, payload: serde_json::Value, phone: &str) -> SendOutcome {
        let (Some(token), Some(phone_id)) = (&self.access_token, &self.phone_id) else {
            info!(to = phone, "[simulated] {payload}");
            return SendOutcome::Simulated;
        };
        let url = format!("{GRAPH_API_BASE}/{phone_id}/messages");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await;
        match resp {
            Ok(resp) if resp.status().is_success() => {
                info!(to = phone, "message sent");
                SendOutcome::Delivered
            }
            Ok(resp) => {
                let status = resp.status();
                let detail = resp.text().await.unwrap_or_default();
                error!(to = phone, %status, %detail, "whatsapp api rejected message");
                SendOutcome::Failed(format!("whatsapp api returned {status}: {detail}"))
            }
            Err(e) => {
                error!(to = phone, "whatsapp api call failed: {e}");
                SendOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Strip everything but digits; the Graph API wants bare digit strings.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Check the provider limits on an interactive send before calling out.
pub fn validate_button_message(
    body: &str,
    buttons: &[Button],
    options: &ButtonOptions,
) -> Result<(), String> {
    if buttons.is_empty() || buttons.len() > MAX_BUTTONS {
        return Err(format!("button count must be 1..={MAX_BUTTONS}"));
    }
    if body.chars().count() > MAX_BODY {
        return Err(format!("body exceeds {MAX_BODY} characters"));
    }
    for b in buttons {
        if b.title.chars().count() > MAX_BUTTON_TITLE {
            return Err(format!(
                "button title '{}' exceeds {MAX_BUTTON_TITLE} characters",
                b.title
            ));
        }
    }
    if let Some(footer) = &options.footer {
        if footer.chars().count() > MAX_FOOTER {
            return Err(format!("footer exceeds {MAX_FOOTER} characters"));
        }
    }
    Ok(())
}

#[async_trait]
impl Transport for WhatsAppTransport {
    async fn send(&self, phone: &str, body: &str) -> SendOutcome {
        let to = normalize_phone(phone);
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });
        self.post_message(payload, phone).await
    }

    async fn send_with_buttons(
        &self,
        phone: &str,
        body: &str,
        buttons: &[Button],
        options: &ButtonOptions,
    ) -> SendOutcome {
        if let Err(reason) = validate_button_message(body, buttons, options) {
            error!(to = phone, %reason, "rejecting oversized button message");
            return SendOutcome::Failed(reason);
        }
        let to = normalize_phone(phone);
        let action_buttons: Vec<_> = buttons
            .iter()
            .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
            .collect();
        let mut interactive = json!({
            "type": "button",
            "body": { "text": body },
            "action": { "buttons": action_buttons },
        });
        if let Some(footer) = &options.footer {
            interactive["footer"] = json!({ "text": footer });
        }
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": interactive,
        });
        self.post_message(payload, phone).await
    }
}
