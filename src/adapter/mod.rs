pub mod connection_manager;
pub mod factory;
pub mod horizontal_adapter;
pub mod horizontal_adapter_base;
pub mod horizontal_transport;
pub mod local_adapter;
pub mod transports;

pub use self::connection_manager::{ConnectionManager, SocketDescriptor};
pub use self::horizontal_adapter_base::HorizontalAdapterBase;
pub use self::local_adapter::LocalAdapter;

/// Redis-backed horizontal adapter
pub type RedisAdapter = HorizontalAdapterBase<transports::RedisTransport>;

/// Horizontal adapter over an in-process bus
pub type MemoryAdapter = HorizontalAdapterBase<transports::MemoryTransport>;
