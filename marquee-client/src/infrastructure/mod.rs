//! Backend access, subscriptions and the query cache.

pub mod backend;
pub mod memory;
pub mod query_cache;
pub mod rest;
pub mod subscription;

pub use backend::{
    AuthGateway, Backend, BackendError, BackendResult, ChangeFeed, ChannelSpec,
    EventFilter, Filter, RowStore,
};
pub use memory::{Gate, MemoryBackend, Op};
pub use query_cache::{QueryCache, QueryKey};
pub use rest::RestBackend;
pub use subscription::{ListenerHub, Subscription, SubscriptionId, Unsubscribe};
