//! Builder for constructing a [`PhoneManager`]
//!
//! All external collaborators are injected here: the platform API client,
//! the transport factory, the durable store, and the clock. Tests supply
//! in-memory fakes; production wires real implementations.

use std::sync::Arc;

use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::provider::{Clock, KeyValueStore, SystemClock, TelephonyApi, TransportFactory};

use super::config::{AuthConfig, PhoneConfig};
use super::manager::PhoneManager;

/// Builder for [`PhoneManager`] instances
pub struct PhoneBuilder {
    config: PhoneConfig,
    api: Option<Arc<dyn TelephonyApi>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
}

impl PhoneBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self {
            config: PhoneConfig::default(),
            api: None,
            transport_factory: None,
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PhoneConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the platform endpoint
    pub fn server(mut self, server: Url) -> Self {
        self.config.server = server;
        self
    }

    /// Set the application client id
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Set the authentication mode and material
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    /// Set the fallback caller id
    pub fn fallback_caller_id(mut self, number: impl Into<String>) -> Self {
        self.config.fallback_caller_id = Some(number.into());
        self
    }

    /// Inject the platform API client
    pub fn api(mut self, api: Arc<dyn TelephonyApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Inject the signaling transport factory
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Inject the durable key/value store
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Inject a clock (defaults to the system clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the manager
    pub fn build(self) -> ClientResult<Arc<PhoneManager>> {
        self.config.validate()?;

        let api = self.api.ok_or(ClientError::MissingConfiguration {
            field: "api".to_string(),
        })?;
        let factory = self
            .transport_factory
            .ok_or(ClientError::MissingConfiguration {
                field: "transport_factory".to_string(),
            })?;
        let store = self.store.ok_or(ClientError::MissingConfiguration {
            field: "store".to_string(),
        })?;

        Ok(PhoneManager::new(self.config, api, factory, store, self.clock))
    }
}

impl Default for PhoneBuilder {
    fn default() -> Self {
        Self::new()
    }
}
