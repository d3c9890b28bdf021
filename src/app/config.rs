use serde::{Deserialize, Serialize};

/// Credentials and quota snapshot of one tenant application.
///
/// Optional limits fall back to the server-wide `presence` and
/// `event_limits` options when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub key: String,
    pub secret: String,
    /// `-1` in configuration means no connection cap.
    #[serde(
        default = "unlimited_connections",
        deserialize_with = "deserialize_flexible_number"
    )]
    pub max_connections: u32,
    #[serde(default)]
    pub enable_client_messages: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "deserialize_optional_number")]
    pub max_presence_members_per_channel: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_optional_kilobytes")]
    pub max_presence_member_size_in_kb: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_number")]
    pub max_event_name_length: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_optional_kilobytes")]
    pub max_event_payload_in_kb: Option<f64>,
}

impl Default for App {
    fn default() -> Self {
        Self {
            id: String::new(),
            key: String::new(),
            secret: String::new(),
            max_connections: unlimited_connections(),
            enable_client_messages: false,
            enabled: true,
            max_presence_members_per_channel: None,
            max_presence_member_size_in_kb: None,
            max_event_name_length: None,
            max_event_payload_in_kb: None,
        }
    }
}

impl App {
    pub fn new(id: impl Into<String>, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            secret: secret.into(),
            ..Self::default()
        }
    }
}

fn unlimited_connections() -> u32 {
    u32::MAX
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            NumberOrText::Number(n) => Ok(n),
            NumberOrText::Text(s) => s.trim().parse::<f64>().map_err(E::custom),
        }
    }
}

// Accepts numbers or numeric strings; negative values mean "unlimited".
fn deserialize_flexible_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = NumberOrText::deserialize(deserializer)?.into_f64::<D::Error>()?;
    if value < 0.0 {
        return Ok(u32::MAX);
    }
    if value > u32::MAX as f64 {
        return Err(D::Error::custom(format!("number {value} is too large for u32")));
    }
    Ok(value as u32)
}

fn deserialize_optional_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(raw) => {
            let value = raw.into_f64::<D::Error>()?;
            if value < 0.0 || value > u32::MAX as f64 {
                return Err(D::Error::custom(format!("number {value} is out of range")));
            }
            Ok(Some(value as u32))
        }
        None => Ok(None),
    }
}

fn deserialize_optional_kilobytes<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(raw) => {
            let value = raw.into_f64::<D::Error>()?;
            if !value.is_finite() || value < 0.0 {
                return Err(D::Error::custom(format!("invalid kilobyte limit {value}")));
            }
            Ok(Some(value))
        }
        None => Ok(None),
    }
}
