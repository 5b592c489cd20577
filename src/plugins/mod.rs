//! Plugin call routing.
//!
//! A [`Router`] resolves a model-issued call against the shared
//! [`PluginRegistry`], injects auth, validates it against the plugin's API
//! document and hands it to a [`PluginTransport`].
//!
//! - **registry**: plugin descriptors.
//! - **request**: the normalized outbound request.
//! - **openapi**: request validation.
//! - **transport**: HTTP and scripted execution.
//! - **bootstrap**: manifest discovery at startup.

pub mod bootstrap;
pub mod openapi;
pub mod registry;
pub mod request;
pub mod transport;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::dialogue::extract::RequestParams;

pub use registry::{AuthKind, PluginAuth, PluginDescriptor, PluginRegistry};
pub use request::PreparedRequest;
pub use transport::{HttpTransport, PluginTransport, ScriptedTransport};

#[derive(Debug, Error, PartialEq)]
pub enum RouterError {
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request does not match the API schema: {0}")]
    SchemaValidation(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<PluginRegistry>,
    transport: PluginTransport,
}

impl Router {
    pub fn new(registry: Arc<PluginRegistry>, transport: PluginTransport) -> Self {
        Self { registry, transport }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Resolve the plugin, inject auth and validate. Nothing is sent.
    pub fn prepare(
        &self,
        plugin_name: &str,
        params: RequestParams,
    ) -> Result<PreparedRequest, RouterError> {
        let plugin = self
            .registry
            .get(plugin_name)
            .ok_or_else(|| RouterError::UnknownPlugin(plugin_name.to_string()))?;

        let mut req = PreparedRequest::from_params(params)?;

        if plugin.auth.kind == AuthKind::UserHttp {
            match &plugin.auth.token {
                Some(token) => {
                    req.headers
                        .retain(|k, _| !k.eq_ignore_ascii_case("authorization"));
                    req.headers
                        .insert("Authorization".into(), format!("Bearer {token}"));
                }
                None => warn!(plugin = %plugin_name, "user_http plugin has no token"),
            }
        }

        if let Some(schema) = &plugin.api_schema {
            schema.validate(&req).map_err(RouterError::SchemaValidation)?;
        }

        debug!(plugin = %plugin_name, method = %req.method, url = %req.url, "call prepared");
        Ok(req)
    }

    /// Execute a prepared request. No retries.
    pub async fn send(&self, req: &PreparedRequest) -> Result<(u16, String), RouterError> {
        self.transport.send(req).await
    }
}
