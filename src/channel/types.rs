use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Public,
    Private,
    Presence,
    PrivateEncrypted,
}

impl ChannelType {
    pub fn from_name(channel_name: &str) -> Self {
        if channel_name.starts_with("private-encrypted-") {
            return Self::PrivateEncrypted;
        }
        match channel_name.split_once('-') {
            Some(("private", _)) => Self::Private,
            Some(("presence", _)) => Self::Presence,
            _ => Self::Public,
        }
    }

    pub fn requires_authentication(&self) -> bool {
        matches!(
            self,
            ChannelType::Private | ChannelType::Presence | ChannelType::PrivateEncrypted
        )
    }

    /// Client events are relayed on authenticated channels only.
    pub fn accepts_client_events(&self) -> bool {
        self.requires_authentication()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMemberInfo {
    pub user_id: String,
    pub user_info: Option<Value>,
}

impl PresenceMemberInfo {
    /// Parses the `channel_data` a presence subscriber sends, given either as
    /// a JSON string or an already decoded object.
    pub fn from_channel_data(channel_data: &Value) -> Result<Self> {
        let decoded;
        let data = match channel_data {
            Value::String(raw) => {
                decoded = serde_json::from_str::<Value>(raw).map_err(|e| {
                    Error::InvalidMessageFormat(format!("channel_data is not valid JSON: {e}"))
                })?;
                &decoded
            }
            other => other,
        };

        let user_id = match data.get("user_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(Error::Channel(
                    "Presence channel_data must carry a user_id".into(),
                ));
            }
        };

        Ok(Self {
            user_id,
            user_info: data.get("user_info").cloned(),
        })
    }
}

/// What a socket holds for each channel it is subscribed to.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSubscription {
    Public,
    Private,
    Presence(PresenceMemberInfo),
}

impl ChannelSubscription {
    pub fn presence_member(&self) -> Option<&PresenceMemberInfo> {
        match self {
            ChannelSubscription::Presence(member) => Some(member),
            _ => None,
        }
    }
}
