//! Shared data model and collaborator interfaces for cluster routing.
//!
//! - `Endpoint`: parsed instance address
//! - `ServiceInstance` / `Route` and the `Registry` that publishes them
//! - `Locator`: authoritative user location store
//! - `GateClient` / `NodeClient`: role-specific transport capabilities
//! - `BufferPool` / `BufferLease`: pooled message buffers with counted release

pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod locator;
pub mod packet;
pub mod registry;
pub mod transport;

pub use buffer::{BufferLease, BufferPool, PackedBuffer};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use locator::{LocationEvent, LocationEventKind, Locator, LocatorWatcher};
pub use packet::{Codec, Encryptor, JsonCodec, Message, Payload};
pub use registry::{Kind, Registry, RegistryWatcher, Route, ServiceInstance, State};
pub use transport::{ClientBuilder, GateClient, NodeClient, Outcome, SessionKind};
