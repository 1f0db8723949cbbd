//! Request/response boundary to the cluster.
//!
//! Everything above this module speaks to the cluster through the object-safe
//! [`ClusterTransport`] trait: a method, a resource path and JSON parameters
//! go in, a JSON document comes out. Calls block until the cluster replies.
//! The cluster may run the work as an internal job and the transport may poll
//! for it; callers never see job ids.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             ModelProxy / DatasetHandle / ArtifactUploader       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │  ClusterTransportExt::call
//!                                ▼  (typed params → typed schema)
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 dyn ClusterTransport::request                   │
//! │   ┌───────────────────────────┐   ┌───────────────────────────┐ │
//! │   │ HttpTransport             │   │ MemoryCluster             │ │
//! │   │ - reqwest + tokio timeout │   │ - in-process key space    │ │
//! │   │ - blocking facade         │   │ - request log for tests   │ │
//! │   └───────────────────────────┘   └───────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use clusterproxy::transport::{ClusterTransportExt, Endpoint, HttpTransport, NoParams};
//! use clusterproxy::transport::protocol::KeysResponse;
//!
//! let transport = HttpTransport::new("http://localhost:54321")?;
//! let keys: KeysResponse = transport.call(&Endpoint::Keys, NoParams::default())?;
//! ```

mod client;
mod error;
mod memory;
pub mod protocol;

use serde::{de::DeserializeOwned, Serialize};

pub use client::HttpTransport;
pub use error::{TransportError, TransportResult};
pub use memory::{MemoryCluster, MemoryModel, RecordedRequest};
pub use protocol::{Endpoint, Method, NoParams};

/// Synchronous request/response boundary to the cluster.
///
/// Implementations must be shareable between threads; proxies hold them
/// behind `Arc<dyn ClusterTransport>`.
pub trait ClusterTransport: Send + Sync {
    /// Issue one request and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Remote`] when the cluster rejects the
    /// request and another variant when the request could not be completed.
    fn request(
        &self,
        method: Method,
        path: &str,
        params: serde_json::Value,
    ) -> TransportResult<serde_json::Value>;
}

/// Typed helpers on top of [`ClusterTransport`].
pub trait ClusterTransportExt: ClusterTransport {
    /// Send typed parameters to an endpoint and parse the reply into `R`.
    ///
    /// A reply that does not fit `R` is [`TransportError::InvalidResponse`].
    fn call<P, R>(&self, endpoint: &Endpoint, params: P) -> TransportResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(TransportError::SerializeFailed)?;
        let response = self.request(endpoint.method(), &endpoint.path(), params)?;
        serde_json::from_value(response).map_err(|e| {
            TransportError::invalid_response(format!("{}: {}", endpoint.path(), e))
        })
    }

    /// Delete a key on the cluster.
    fn remove(&self, key: &crate::key::RemoteKey) -> TransportResult<()> {
        self.request(
            Method::Delete,
            &Endpoint::Remove(key.clone()).path(),
            serde_json::Value::Object(Default::default()),
        )
        .map(|_| ())
    }
}

impl<T: ClusterTransport + ?Sized> ClusterTransportExt for T {}

impl<T: ClusterTransport + ?Sized> ClusterTransport for std::sync::Arc<T> {
    fn request(
        &self,
        method: Method,
        path: &str,
        params: serde_json::Value,
    ) -> TransportResult<serde_json::Value> {
        (**self).request(method, path, params)
    }
}

impl<T: ClusterTransport + ?Sized> ClusterTransport for &T {
    fn request(
        &self,
        method: Method,
        path: &str,
        params: serde_json::Value,
    ) -> TransportResult<serde_json::Value> {
        (**self).request(method, path, params)
    }
}
