//! Chat interaction endpoint.
//!
//! Pings are answered inline. Known commands are acknowledged with a
//! deferred response and run in a spawned task; the real reply arrives later
//! through the follow-up webhook. The task waits `reply_delay` first: a
//! follow-up posted before the platform has seen the deferred response is
//! rejected.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use spinup_model::InteractionRef;

use crate::state::AppState;

const PING: u8 = 1;
const APPLICATION_COMMAND: u8 = 2;

const PONG: u8 = 1;
const CHANNEL_MESSAGE: u8 = 4;
const DEFERRED_CHANNEL_MESSAGE: u8 = 5;

#[derive(Debug, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub data: Option<CommandData>,
    #[serde(default)]
    pub member: Option<Member>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandData {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Member {
    pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl Interaction {
    /// Guild commands carry the caller under `member.user`, DMs under `user`.
    fn caller(&self) -> Option<&User> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
    }

    fn reply_target(&self) -> Option<InteractionRef> {
        if self.application_id.is_empty() || self.token.is_empty() {
            return None;
        }
        Some(InteractionRef {
            application_id: self.application_id.clone(),
            token: self.token.clone(),
            user: self
                .caller()
                .map(|u| u.username.clone().unwrap_or_else(|| u.id.clone())),
            channel_id: self.channel_id.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct InteractionResponse {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<MessageData>,
}

#[derive(Debug, Serialize)]
struct MessageData {
    content: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

fn json_error(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(ErrorBody { message: message.into() })).into_response()
}

fn respond(kind: u8, content: Option<String>) -> Response {
    Json(InteractionResponse {
        kind,
        data: content.map(|content| MessageData { content }),
    })
    .into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/interactions", post(interactions))
        .with_state(state)
}

async fn interactions(State(state): State<AppState>, body: Bytes) -> Response {
    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(i) => i,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed interaction");
            return json_error(StatusCode::BAD_REQUEST, format!("malformed interaction: {e}"));
        }
    };

    match interaction.kind {
        PING => respond(PONG, None),
        APPLICATION_COMMAND => dispatch(state, &interaction),
        other => json_error(
            StatusCode::BAD_REQUEST,
            format!("unsupported interaction type {other}"),
        ),
    }
}

fn dispatch(state: AppState, interaction: &Interaction) -> Response {
    let Some(target) = interaction.reply_target() else {
        return json_error(StatusCode::BAD_REQUEST, "application_id and token are required");
    };
    let name = interaction
        .data
        .as_ref()
        .map(|d| d.name.as_str())
        .unwrap_or_default();

    tracing::info!(command = %name, user = ?target.user, "interaction received");

    let delay = state.reply_delay;
    match name {
        "start" => {
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let outcome = state.handler.start(&target).await;
                tracing::info!(?outcome, "start handled");
            });
            respond(DEFERRED_CHANNEL_MESSAGE, None)
        }
        "ip" => {
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let outcome = state.handler.show_ip(&target).await;
                tracing::info!(?outcome, "ip handled");
            });
            respond(DEFERRED_CHANNEL_MESSAGE, None)
        }
        other => respond(CHANNEL_MESSAGE, Some(format!("Unknown command: {other}"))),
    }
}

#[derive(Debug, Serialize)]
struct LeaseView {
    state: String,
    lease_expiry: i64,
    fresh: bool,
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    resource_id: String,
    lease: Option<LeaseView>,
    error: Option<String>,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    let handler = &state.handler;
    let now = handler.now_unix();
    let (lease, error) = match handler.lookup().await {
        Ok(lookup) => (
            lookup.record().map(|r| LeaseView {
                state: r.state.to_string(),
                lease_expiry: r.lease_expiry,
                fresh: r.is_fresh(now),
            }),
            None,
        ),
        Err(e) => (None, Some(e.to_string())),
    };

    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        resource_id: handler.resource_id().to_string(),
        lease,
        error,
    })
}
