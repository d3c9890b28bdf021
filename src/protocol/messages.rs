use crate::channel::PresenceMemberInfo;
use crate::protocol::constants::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceData {
    pub ids: Vec<String>,
    pub hash: HashMap<String, Option<Value>>,
    pub count: usize,
}

impl PresenceData {
    pub fn from_members(members: &HashMap<String, PresenceMemberInfo>) -> Self {
        let mut ids: Vec<String> = members.keys().cloned().collect();
        ids.sort();
        let hash = members
            .iter()
            .map(|(user_id, member)| (user_id.clone(), member.user_info.clone()))
            .collect();
        Self {
            count: ids.len(),
            ids,
            hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageData {
    String(String),
    Structured {
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<String>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    Json(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusherMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl MessageData {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            MessageData::String(s) => Some(s),
            _ => None,
        }
    }

    /// The payload as one JSON value, whatever shape it was parsed into.
    pub fn to_value(&self) -> Value {
        match self {
            MessageData::String(s) => Value::String(s.clone()),
            MessageData::Json(v) => v.clone(),
            MessageData::Structured {
                channel_data,
                channel,
                auth,
                extra,
            } => {
                let mut map: serde_json::Map<String, Value> = extra
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if let Some(channel_data) = channel_data {
                    map.insert("channel_data".into(), Value::String(channel_data.clone()));
                }
                if let Some(channel) = channel {
                    map.insert("channel".into(), Value::String(channel.clone()));
                }
                if let Some(auth) = auth {
                    map.insert("auth".into(), Value::String(auth.clone()));
                }
                Value::Object(map)
            }
        }
    }

    /// Decodes string payloads that carry JSON text.
    pub fn parsed_value(&self) -> Value {
        match self {
            MessageData::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
            }
            other => other.to_value(),
        }
    }
}

impl From<String> for MessageData {
    fn from(s: String) -> Self {
        MessageData::String(s)
    }
}

impl From<Value> for MessageData {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => MessageData::String(s),
            other => MessageData::Json(other),
        }
    }
}

impl PusherMessage {
    fn event(event: &str) -> Self {
        Self {
            event: Some(event.to_string()),
            channel: None,
            name: None,
            data: None,
            user_id: None,
        }
    }

    pub fn connection_established(socket_id: String, activity_timeout: u64) -> Self {
        Self {
            data: Some(MessageData::from(
                json!({
                    "socket_id": socket_id,
                    "activity_timeout": activity_timeout
                })
                .to_string(),
            )),
            ..Self::event(EVENT_CONNECTION_ESTABLISHED)
        }
    }

    pub fn subscription_succeeded(channel: String, presence_data: Option<PresenceData>) -> Self {
        let data_obj = match presence_data {
            Some(data) => json!({
                "presence": {
                    "ids": data.ids,
                    "hash": data.hash,
                    "count": data.count
                }
            }),
            None => json!({}),
        };

        Self {
            channel: Some(channel),
            data: Some(MessageData::String(data_obj.to_string())),
            ..Self::event(EVENT_SUBSCRIPTION_SUCCEEDED)
        }
    }

    pub fn subscription_error(channel: String, kind: &str, status: u16, error: String) -> Self {
        Self {
            channel: Some(channel),
            data: Some(MessageData::Json(json!({
                "type": kind,
                "error": error,
                "status": status
            }))),
            ..Self::event(EVENT_SUBSCRIPTION_ERROR)
        }
    }

    pub fn error(code: u16, message: String, channel: Option<String>) -> Self {
        Self {
            channel,
            data: Some(MessageData::Json(json!({
                "code": code,
                "message": message
            }))),
            ..Self::event(EVENT_ERROR)
        }
    }

    pub fn ping() -> Self {
        Self::event(EVENT_PING)
    }

    pub fn pong() -> Self {
        Self::event(EVENT_PONG)
    }

    pub fn member_added(channel: String, user_id: String, user_info: Option<Value>) -> Self {
        Self {
            channel: Some(channel),
            data: Some(MessageData::String(
                json!({
                    "user_id": user_id,
                    "user_info": user_info.unwrap_or_else(|| json!({}))
                })
                .to_string(),
            )),
            ..Self::event(EVENT_MEMBER_ADDED)
        }
    }

    pub fn member_removed(channel: String, user_id: String) -> Self {
        Self {
            channel: Some(channel),
            data: Some(MessageData::String(
                json!({
                    "user_id": user_id
                })
                .to_string(),
            )),
            ..Self::event(EVENT_MEMBER_REMOVED)
        }
    }

    /// A `client-*` event relayed to the other subscribers of a channel.
    pub fn client_event(
        event: String,
        channel: String,
        data: Value,
        user_id: Option<String>,
    ) -> Self {
        Self {
            event: Some(event),
            channel: Some(channel),
            data: Some(MessageData::from(data)),
            name: None,
            user_id,
        }
    }

    pub fn is_client_event(&self) -> bool {
        self.event
            .as_deref()
            .is_some_and(|event| event.starts_with(CLIENT_EVENT_PREFIX))
    }
}
