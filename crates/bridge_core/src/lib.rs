//! Per-account session supervision for a chat bridge.
//!
//! A [`Bridge`] owns one [`Session`] per bridged account. Each session keeps
//! its remote client connected through a [`Supervisor`], routes live events
//! through an [`EventRouter`], and memoizes remote users and groups in an
//! [`EntityCache`].

pub mod background;
pub mod backoff;
pub mod bootstrap;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod entity_cache;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_support;

pub use background::BackgroundTasks;
pub use backoff::{Backoff, BackoffPolicy, BackoffStep, Severity};
pub use bootstrap::{Bridge, BridgeContext, Collaborators, SyncReport};
pub use client::{ClientEvent, ClientFactory, RemoteClient, TokenStore};
pub use collaborators::{
    BridgeStateEvent, LocalChat, MessageContext, NoticeKind, Portal, PortalDirectory, StateUpdate,
    StatusReporter,
};
pub use config::{load_settings, load_settings_from, prepare_database_url, BridgeSettings};
pub use entity_cache::{EntityCache, LazyCache};
pub use error::SessionError;
pub use metrics::BridgeMetrics;
pub use registry::SessionRegistry;
pub use router::{classify, ConversationResolver, Dispatch, EventRouter};
pub use session::{NameState, Session};
pub use store::AccountStore;
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorHooks, SupervisorState};
