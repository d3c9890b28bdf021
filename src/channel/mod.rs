pub mod manager;
pub mod types;

pub use self::manager::{
    ChannelManager, ClientEventOutcome, ClientEventRequest, JoinResponse, LeaveResponse,
    SubscriptionRequest,
};
pub use self::types::{ChannelSubscription, ChannelType, PresenceMemberInfo};
