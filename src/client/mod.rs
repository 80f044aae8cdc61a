//! The composed softphone client
//!
//! This module wires the leaf components into one observable store:
//!
//! - **`manager`** - the [`PhoneManager`] composing vault, transport session,
//!   call registry, supervisor, and history cache
//! - **`transport`** - connection state machine, authentication exchange,
//!   transport provisioning, and event routing
//! - **`supervisor`** - credential refresh and transport-loss recovery
//! - **`config`** - client configuration
//! - **`builder`** - dependency-injecting construction
//!
//! # Basic Flow
//!
//! ```rust,no_run
//! # use webphone_core::client::{PhoneBuilder, AuthConfig};
//! # use std::sync::Arc;
//! # async fn example(
//! #     api: Arc<dyn webphone_core::provider::TelephonyApi>,
//! #     factory: Arc<dyn webphone_core::provider::TransportFactory>,
//! #     store: Arc<dyn webphone_core::provider::KeyValueStore>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let phone = PhoneBuilder::new()
//!     .client_id("my-app")
//!     .auth(AuthConfig::JwtAssertion { assertion: "jwt".into() })
//!     .api(api)
//!     .transport_factory(factory)
//!     .store(store)
//!     .build()?;
//!
//! let _sub = phone.subscribe(|| {
//!     // re-read state through the getters
//! });
//!
//! phone.connect().await?;
//! let call = phone.make_call("+15551234567", None).await?;
//! call.hangup().await?;
//! phone.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod manager;
pub mod supervisor;
pub mod transport;

pub use builder::PhoneBuilder;
pub use config::{AuthConfig, PhoneConfig};
pub use manager::PhoneManager;
pub use supervisor::{Backoff, BackoffConfig};
pub use transport::{ConnectionState, ConnectionStore};
