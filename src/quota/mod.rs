//! Per-application admission rules.
//!
//! Every check is a pure function of an [`AppLimits`] snapshot and the
//! counts handed in by the caller. Connection and presence counts are
//! expected to be cluster-wide.

use crate::app::config::App;
use crate::ensure;
use crate::options::{EventLimits, PresenceConfig};
use serde_json::Value;
use thiserror::Error;

/// Effective limits of one app, with server-wide defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct AppLimits {
    pub max_connections: u32,
    pub client_messages_enabled: bool,
    pub max_presence_members_per_channel: u32,
    pub max_presence_member_size_in_kb: f64,
    pub max_event_name_length: usize,
    pub max_event_payload_in_kb: f64,
}

impl AppLimits {
    pub fn resolve(app: &App, presence: &PresenceConfig, events: &EventLimits) -> Self {
        Self {
            max_connections: app.max_connections,
            client_messages_enabled: app.enable_client_messages,
            max_presence_members_per_channel: app
                .max_presence_members_per_channel
                .unwrap_or(presence.max_members_per_channel),
            max_presence_member_size_in_kb: app
                .max_presence_member_size_in_kb
                .unwrap_or(presence.max_member_size_in_kb),
            max_event_name_length: app
                .max_event_name_length
                .unwrap_or(events.max_name_length) as usize,
            max_event_payload_in_kb: app
                .max_event_payload_in_kb
                .unwrap_or(events.max_payload_in_kb),
        }
    }
}

/// Why a quota check refused an operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuotaRejection {
    #[error("The current concurrent connections quota has been reached.")]
    OverQuota,

    #[error("The maximum members per presence channel limit was reached")]
    LimitReached,

    #[error("The maximum size for a channel member is {max_kb} KB.")]
    MemberTooLarge { max_kb: f64 },

    #[error("The app does not have client messaging enabled.")]
    ClientEventsDisabled,

    #[error("Event name is too long. Maximum allowed size is {max_length}.")]
    NameTooLong { max_length: usize },

    #[error("The event data should be less than {max_kb} KB.")]
    PayloadTooLarge { max_kb: f64 },

    #[error("Client events are only supported on private and presence channels.")]
    PublicChannel,
}

impl QuotaRejection {
    /// Pusher status code carried in the rejection frame.
    pub fn status(&self) -> u16 {
        match self {
            QuotaRejection::OverQuota => 4004,
            QuotaRejection::LimitReached => 4100,
            _ => 4301,
        }
    }

    /// Value of the `type` field in `pusher:subscription_error` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            QuotaRejection::OverQuota => "OverQuota",
            QuotaRejection::LimitReached | QuotaRejection::MemberTooLarge { .. } => "LimitReached",
            _ => "ClientEventRejected",
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    limits: AppLimits,
}

impl QuotaPolicy {
    pub fn new(limits: AppLimits) -> Self {
        Self { limits }
    }

    pub fn for_app(app: &App, presence: &PresenceConfig, events: &EventLimits) -> Self {
        Self::new(AppLimits::resolve(app, presence, events))
    }

    pub fn limits(&self) -> &AppLimits {
        &self.limits
    }

    pub fn check_connection_admission(
        &self,
        current_connections: usize,
    ) -> Result<(), QuotaRejection> {
        ensure!(
            (current_connections as u64) < self.limits.max_connections as u64,
            QuotaRejection::OverQuota
        );
        Ok(())
    }

    /// Only a user that is not yet a member counts against the cap; extra
    /// sockets of an existing member are always admitted.
    pub fn check_presence_admission(
        &self,
        current_members: usize,
        is_new_user: bool,
    ) -> Result<(), QuotaRejection> {
        if !is_new_user {
            return Ok(());
        }
        ensure!(
            (current_members as u64) < self.limits.max_presence_members_per_channel as u64,
            QuotaRejection::LimitReached
        );
        Ok(())
    }

    pub fn check_presence_member_size(
        &self,
        user_info: Option<&Value>,
    ) -> Result<(), QuotaRejection> {
        let size = user_info.map_or(0, payload_size_in_bytes);
        let max_kb = self.limits.max_presence_member_size_in_kb;
        ensure!(
            kilobytes(size) <= max_kb,
            QuotaRejection::MemberTooLarge { max_kb }
        );
        Ok(())
    }

    /// Checks run in a fixed order: enabled flag, name length, payload size.
    pub fn check_client_event(&self, event: &str, payload: &Value) -> Result<(), QuotaRejection> {
        ensure!(
            self.limits.client_messages_enabled,
            QuotaRejection::ClientEventsDisabled
        );

        let max_length = self.limits.max_event_name_length;
        ensure!(
            event.chars().count() <= max_length,
            QuotaRejection::NameTooLong { max_length }
        );

        let max_kb = self.limits.max_event_payload_in_kb;
        ensure!(
            kilobytes(payload_size_in_bytes(payload)) <= max_kb,
            QuotaRejection::PayloadTooLarge { max_kb }
        );

        Ok(())
    }
}

/// String payloads count their UTF-8 length; anything else its JSON text.
pub fn payload_size_in_bytes(payload: &Value) -> usize {
    match payload {
        Value::String(text) => text.len(),
        other => other.to_string().len(),
    }
}

fn kilobytes(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}
