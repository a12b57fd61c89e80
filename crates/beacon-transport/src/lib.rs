//! # beacon-transport
//!
//! How the beacon dispatcher talks to the collection service.
//!
//! - [`Transport`]: the async HTTP seam (`post`, `get`, `delete`)
//! - [`ReqwestTransport`]: production implementation
//! - [`mock::MockTransport`]: scripted transport for tests
//! - [`codec`]: JSON encoding plus success/rejection classification

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod http;
pub mod mock;
mod reqwest_transport;

pub use codec::{Reply, classify};
pub use errors::{CodecError, TransportError};
pub use http::{HeaderList, HttpResponse, Method, Transport, with_query};
pub use reqwest_transport::ReqwestTransport;
