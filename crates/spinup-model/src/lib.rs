use std::{fmt, str::FromStr};

/// Control state of the managed server as persisted in the lease store.
///
/// NOTE: `stopPending` and `stopped` are written by the external stop flow.
/// They are valid stored values even though nothing in this workspace
/// produces them besides the implicit "absent record" default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerState {
    Stopped,
    StartPending,
    Running,
    StopPending,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::StartPending => "startPending",
            ServerState::Running => "running",
            ServerState::StopPending => "stopPending",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown server state: {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for ServerState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(ServerState::Stopped),
            "startPending" => Ok(ServerState::StartPending),
            "running" => Ok(ServerState::Running),
            "stopPending" => Ok(ServerState::StopPending),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// One row per managed server. `lease_expiry` is unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StateRecord {
    pub id: String,
    pub state: ServerState,
    pub lease_expiry: i64,
}

impl StateRecord {
    /// The lease is valid while `now < lease_expiry`.
    pub fn is_fresh(&self, now_unix: i64) -> bool {
        now_unix < self.lease_expiry
    }

    /// A fresh record in any state other than `stopped` is owned by someone.
    pub fn is_claimed(&self, now_unix: i64) -> bool {
        self.is_fresh(now_unix) && self.state != ServerState::Stopped
    }
}

/// Deferred action carried through the command channel.
///
/// Unknown wire values are kept as `Other` so the worker can log and drop
/// them instead of treating the whole message as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    StartServer,
    ShowIp,
    Other(String),
}

impl CommandKind {
    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::StartServer => "startServer",
            CommandKind::ShowIp => "showIP",
            CommandKind::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for CommandKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "startServer" => CommandKind::StartServer,
            "showIP" => CommandKind::ShowIp,
            _ => CommandKind::Other(s),
        }
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to send the follow-up reply for a chat interaction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InteractionRef {
    pub application_id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl InteractionRef {
    pub fn followup_url(&self, api_base: &str) -> String {
        format!(
            "{}/webhooks/{}/{}",
            api_base.trim_end_matches('/'),
            self.application_id,
            self.token
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub data: InteractionRef,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed command body: {0}")]
pub struct CommandDecodeError(#[from] serde_json::Error);

impl Command {
    pub fn new(kind: CommandKind, data: InteractionRef) -> Self {
        Self { kind, data }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(body: &str) -> Result<Self, CommandDecodeError> {
        Ok(serde_json::from_str(body)?)
    }
}
