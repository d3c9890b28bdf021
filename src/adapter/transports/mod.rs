pub mod memory_transport;
pub mod redis_transport;

pub use memory_transport::{MemoryBus, MemoryTransport, MemoryTransportConfig};
pub use redis_transport::{RedisAdapterConfig, RedisTransport};
