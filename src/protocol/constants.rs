pub const ACTIVITY_TIMEOUT: u64 = 120;

pub const CLIENT_EVENT_PREFIX: &str = "client-";

pub const EVENT_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const EVENT_ERROR: &str = "pusher:error";
pub const EVENT_PING: &str = "pusher:ping";
pub const EVENT_PONG: &str = "pusher:pong";
pub const EVENT_SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const EVENT_MEMBER_ADDED: &str = "pusher_internal:member_added";
pub const EVENT_MEMBER_REMOVED: &str = "pusher_internal:member_removed";
