//! CLI configuration loaded from environment variables.
//!
//! Only the user id is mandatory; everything else falls back to defaults
//! suitable for a local development server.

use thiserror::Error;

use courier_shared::{ConversationTarget, UserId};
use courier_sync::{CurrentUser, SyncConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Base URL of the message API.
    /// Env: `COURIER_API_URL`
    /// Default: `http://localhost:8000/api`
    pub api_url: String,

    /// Bearer token sent with every request.
    /// Env: `COURIER_API_TOKEN`
    pub api_token: Option<String>,

    /// Signed-in user.
    /// Env: `COURIER_USER_ID` (required), `COURIER_USER_NAME`, `COURIER_PRIVILEGED`
    pub user: CurrentUser,

    /// Conversation to open: `own` or a user id (privileged users only).
    /// Env: `COURIER_TARGET`
    /// Default: `own`
    pub target: ConversationTarget,

    pub sync: SyncConfig,
}

impl CliConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let user_id = var("COURIER_USER_ID").ok_or(ConfigError::Missing("COURIER_USER_ID"))?;
        let id = UserId::new(user_id).map_err(|e| ConfigError::Invalid {
            name: "COURIER_USER_ID",
            reason: e.to_string(),
        })?;

        let is_privileged = match var("COURIER_PRIVILEGED").as_deref() {
            None => false,
            Some(raw) => parse_flag(raw).ok_or_else(|| ConfigError::Invalid {
                name: "COURIER_PRIVILEGED",
                reason: format!("expected true/false, got {raw:?}"),
            })?,
        };

        let target = match var("COURIER_TARGET").as_deref() {
            None | Some("own") => ConversationTarget::Own,
            Some(_) if !is_privileged => {
                return Err(ConfigError::Invalid {
                    name: "COURIER_TARGET",
                    reason: "only privileged users can open another conversation".into(),
                })
            }
            Some(other) => ConversationTarget::User(UserId::new(other).map_err(|e| {
                ConfigError::Invalid {
                    name: "COURIER_TARGET",
                    reason: e.to_string(),
                }
            })?),
        };

        Ok(Self {
            api_url: var("COURIER_API_URL").unwrap_or_else(|| "http://localhost:8000/api".into()),
            api_token: var("COURIER_API_TOKEN"),
            user: CurrentUser {
                name: var("COURIER_USER_NAME").unwrap_or_else(|| format!("user {id}")),
                id,
                avatar: None,
                is_privileged,
            },
            target,
            sync: SyncConfig::from_vars(&lookup),
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
