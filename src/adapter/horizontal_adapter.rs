use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::adapter::connection_manager::SocketDescriptor;
use crate::adapter::local_adapter::LocalAdapter;
use crate::channel::PresenceMemberInfo;
use crate::error::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Request types for horizontal communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Sockets,        // All sockets of an app
    SocketsCount,   // Number of sockets of an app
    ChannelSockets, // Sockets subscribed to a channel
    ChannelMembers, // Presence members of a channel
    MemberExists,   // Whether a user is a member of a presence channel
}

/// Request body for horizontal communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    pub request_id: String,
    pub node_id: String,
    pub app_id: String,
    pub request_type: RequestType,
    pub channel: Option<String>,
    pub user_id: Option<String>,
}

/// One node's partial answer to a request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseBody {
    pub request_id: String,
    pub node_id: String,
    pub app_id: String,
    #[serde(default)]
    pub sockets: Vec<SocketDescriptor>,
    #[serde(default)]
    pub members: HashMap<String, PresenceMemberInfo>,
    #[serde(default)]
    pub sockets_count: usize,
    #[serde(default)]
    pub exists: bool,
}

/// Message for broadcasting events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub node_id: String,
    pub app_id: String,
    pub channel: String,
    pub message: String,
    pub except_socket_id: Option<String>,
}

/// Request tracking struct
#[derive(Clone)]
pub struct PendingRequest {
    pub(crate) start_time: Instant,
    pub(crate) app_id: String,
    pub(crate) responses: Vec<ResponseBody>,
    pub(crate) notify: Arc<Notify>,
}

impl PendingRequest {
    pub fn new(app_id: &str, expected: usize) -> Self {
        Self {
            start_time: Instant::now(),
            app_id: app_id.to_string(),
            responses: Vec::with_capacity(expected),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// Node-local state of the request/response protocol.
pub struct HorizontalAdapter {
    pub node_id: String,

    pub local_adapter: Arc<LocalAdapter>,

    pub pending_requests: DashMap<String, PendingRequest>,

    /// Timeout for requests in milliseconds
    pub requests_timeout: u64,
}

impl HorizontalAdapter {
    pub fn new(node_id: String, requests_timeout: u64) -> Self {
        Self {
            local_adapter: Arc::new(LocalAdapter::with_node_id(node_id.clone())),
            node_id,
            pending_requests: DashMap::new(),
            requests_timeout,
        }
    }

    /// Sweeps requests nobody is waiting on anymore. The task ends once the
    /// adapter is dropped.
    pub fn start_request_cleanup(self: &Arc<Self>) {
        let adapter: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.requests_timeout.clamp(100, 1000));

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(adapter) = adapter.upgrade() else {
                    break;
                };

                let timeout = Duration::from_millis(adapter.requests_timeout);
                let now = Instant::now();
                adapter.pending_requests.retain(|request_id, request| {
                    // Waiters remove their own entry; allow one extra period.
                    let expired = now.duration_since(request.start_time) > timeout * 2;
                    if expired {
                        warn!(
                            "Request {} for app {} expired with {} response(s)",
                            request_id,
                            request.app_id,
                            request.responses.len()
                        );
                    }
                    !expired
                });
            }
        });
    }

    /// Builds this node's answer from local state.
    pub fn answer(&self, request: &RequestBody) -> ResponseBody {
        let mut response = ResponseBody {
            request_id: request.request_id.clone(),
            node_id: self.node_id.clone(),
            app_id: request.app_id.clone(),
            ..ResponseBody::default()
        };
        let local = &self.local_adapter;
        let app_id = request.app_id.as_str();

        match request.request_type {
            RequestType::Sockets => {
                response.sockets = local.local_sockets(app_id).into_iter().collect();
                response.sockets_count = response.sockets.len();
            }
            RequestType::SocketsCount => {
                response.sockets_count = local.local_sockets_count(app_id);
            }
            RequestType::ChannelSockets => {
                if let Some(channel) = &request.channel {
                    response.sockets = local
                        .local_channel_sockets(app_id, channel)
                        .into_iter()
                        .collect();
                    response.sockets_count = response.sockets.len();
                }
            }
            RequestType::ChannelMembers => {
                if let Some(channel) = &request.channel {
                    response.members = local.local_channel_members(app_id, channel);
                }
            }
            RequestType::MemberExists => {
                if let (Some(channel), Some(user_id)) = (&request.channel, &request.user_id) {
                    response.exists = local.local_is_member(app_id, channel, user_id);
                }
            }
        }

        response
    }

    /// Process a received request from another node
    pub fn process_request(&self, request: &RequestBody) -> Result<ResponseBody> {
        if request.node_id == self.node_id {
            return Err(Error::OwnRequestIgnored);
        }

        debug!(
            "Processing request {} from node {}: {:?}",
            request.request_id, request.node_id, request.request_type
        );
        Ok(self.answer(request))
    }

    /// Process a response received from another node
    pub fn process_response(&self, response: ResponseBody) {
        if let Some(mut request) = self.pending_requests.get_mut(&response.request_id) {
            request.responses.push(response);
            request.notify.notify_one();
        } else {
            debug!(
                "Late response {} from node {} discarded",
                response.request_id, response.node_id
            );
        }
    }

    pub fn aggregate_responses(
        &self,
        request_id: String,
        app_id: String,
        request_type: RequestType,
        responses: Vec<ResponseBody>,
    ) -> ResponseBody {
        let mut combined = ResponseBody {
            request_id,
            node_id: self.node_id.clone(),
            app_id,
            ..ResponseBody::default()
        };

        let mut unique_sockets: HashSet<SocketDescriptor> = HashSet::new();

        for response in responses {
            match request_type {
                RequestType::Sockets | RequestType::ChannelSockets => {
                    unique_sockets.extend(response.sockets);
                }
                RequestType::SocketsCount => {
                    combined.sockets_count += response.sockets_count;
                }
                RequestType::ChannelMembers => {
                    // A user connected to several nodes keeps the first info seen.
                    for (user_id, member) in response.members {
                        combined.members.entry(user_id).or_insert(member);
                    }
                }
                RequestType::MemberExists => {
                    combined.exists |= response.exists;
                }
            }
        }

        if matches!(
            request_type,
            RequestType::Sockets | RequestType::ChannelSockets
        ) {
            combined.sockets = unique_sockets.into_iter().collect();
            combined.sockets_count = combined.sockets.len();
        }

        combined
    }
}
