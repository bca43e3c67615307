//! Storage gateways for the Hearth blockstore.
//!
//! A gateway is a URL-addressed byte store. Stores only ever talk to the
//! [`Gateway`] trait; concrete backends and decorators are interchangeable.
//!
//! # Backends
//!
//! - [`MemoryGateway`] -- `HashMap`-based backend for tests and embedding
//!
//! # Decorators
//!
//! Decorators implement [`Gateway`] themselves and wrap another gateway:
//!
//! - [`InterceptorGateway`] -- routes every call through a
//!   [`GatewayInterceptor`] that may rewrite or short-circuit it
//!   ([`FaultInjector`] is the stock interceptor for fault injection)
//! - [`FragmentGateway`] -- splits payloads into bounded fragments when the
//!   URL carries a `fragSize` parameter
//!
//! # Design Rules
//!
//! 1. `get` on a missing entry returns [`GatewayError::NotFound`], never an
//!    empty body.
//! 2. Gateways never interpret payloads.
//! 3. Backends are selected by URL scheme through an explicit
//!    [`GatewayRegistry`] value, not a global.

pub mod error;
pub mod fault;
pub mod fragment;
pub mod interceptor;
pub mod memory;
pub mod registry;
pub mod traits;

pub use error::{GatewayError, GatewayResult};
pub use fault::FaultInjector;
pub use fragment::FragmentGateway;
pub use interceptor::{GatewayInterceptor, Intercept, InterceptorGateway, PassThrough};
pub use memory::MemoryGateway;
pub use registry::{GatewayConstructor, GatewayRegistry};
pub use traits::{Gateway, Subscription};
