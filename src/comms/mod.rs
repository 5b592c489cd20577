//! Front-end channels.
//!
//! - **pty**: interactive console (`-i`), one session per process.
//! - **ws**: WebSocket server, one session per connection.
//!
//! Every channel opens sessions from the same [`SessionFactory`], so the
//! provider, dispatcher and plugin registry are shared read-only.

#[cfg(feature = "channel-pty")]
pub mod pty;
#[cfg(feature = "channel-axum")]
pub mod ws;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::config::Config;
use crate::core::error::AppError;
use crate::dialogue::SessionFactory;
use crate::runtime::{Component, SubsystemHandle, spawn_components};

/// Build the enabled channels and start them.
pub fn start(
    config: &Config,
    factory: SessionFactory,
    interactive: bool,
    shutdown: CancellationToken,
) -> Result<SubsystemHandle, AppError> {
    let mut components: Vec<Box<dyn Component>> = Vec::new();

    #[cfg(feature = "channel-pty")]
    if interactive && config.comms_pty_should_load() {
        components.push(Box::new(pty::PtyChannel::new("pty0", factory.clone())));
    }
    #[cfg(not(feature = "channel-pty"))]
    if interactive {
        tracing::warn!("console requested but this build has no channel-pty feature");
    }

    #[cfg(feature = "channel-axum")]
    if config.comms_ws_should_load() {
        components.push(Box::new(ws::WsChannel::new(
            "ws0",
            config.comms.ws.bind.clone(),
            factory.clone(),
        )));
    }

    if components.is_empty() {
        return Err(AppError::Comms(
            "no channel enabled: pass -i for the console or enable [comms.ws]".into(),
        ));
    }

    let ids: Vec<&str> = components.iter().map(|c| c.id()).collect();
    info!(channels = %ids.join(", "), "starting channels");
    drop(factory);
    Ok(spawn_components(components, shutdown))
}
