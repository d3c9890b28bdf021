pub mod constants;
pub mod messages;
