//! Presence membership of the sockets connected to this node.

use crate::channel::PresenceMemberInfo;
use crate::websocket::SocketId;
use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug)]
struct MemberRecord {
    info: PresenceMemberInfo,
    sockets: AHashSet<SocketId>,
}

/// Per-channel table of `user_id -> (user_info, local sockets)`.
///
/// A user stays a member while at least one of its sockets is joined; the
/// size of that socket set is the user's local reference count.
#[derive(Debug, Default)]
pub struct PresenceStore {
    channels: DashMap<String, AHashMap<String, MemberRecord>>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this is the user's first local socket in the channel.
    /// User info from the first join is kept for later sockets of the user.
    pub fn join(&self, channel: &str, member: &PresenceMemberInfo, socket_id: SocketId) -> bool {
        let mut members = self.channels.entry(channel.to_string()).or_default();
        match members.get_mut(&member.user_id) {
            Some(record) => {
                record.sockets.insert(socket_id);
                false
            }
            None => {
                let mut sockets = AHashSet::new();
                sockets.insert(socket_id);
                members.insert(
                    member.user_id.clone(),
                    MemberRecord {
                        info: member.clone(),
                        sockets,
                    },
                );
                debug!("User {} joined presence channel {}", member.user_id, channel);
                true
            }
        }
    }

    /// Returns true when the user's last local socket left the channel.
    /// Leaving with a socket that never joined changes nothing.
    pub fn leave(&self, channel: &str, user_id: &str, socket_id: &SocketId) -> bool {
        let Some(mut members) = self.channels.get_mut(channel) else {
            return false;
        };

        let last_socket = match members.get_mut(user_id) {
            Some(record) => {
                if !record.sockets.remove(socket_id) {
                    return false;
                }
                record.sockets.is_empty()
            }
            None => return false,
        };

        if last_socket {
            members.remove(user_id);
            debug!("User {} left presence channel {}", user_id, channel);
        }
        drop(members);

        self.channels.remove_if(channel, |_, members| members.is_empty());
        last_socket
    }

    pub fn local_members(&self, channel: &str) -> HashMap<String, PresenceMemberInfo> {
        self.channels
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .map(|(user_id, record)| (user_id.clone(), record.info.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_member(&self, channel: &str, user_id: &str) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|members| members.contains_key(user_id))
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub fn socket_count(&self, channel: &str, user_id: &str) -> usize {
        self.channels
            .get(channel)
            .and_then(|members| members.get(user_id).map(|record| record.sockets.len()))
            .unwrap_or(0)
    }
}
