//! Channel serve loop.
//!
//! Receives envelopes from one channel until it closes and dispatches them
//! to the service. A rejected message is logged and answered with an END
//! carrying the reason; the loop keeps going.

use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::service::DiffSyncService;
use std::sync::Arc;
use sync_types::{End, Envelope, Message};

/// Serve `channel` until the remote end hangs up.
///
/// # Errors
///
/// Returns an error only when receiving fails for a reason other than the
/// channel closing.
pub async fn serve_channel(service: Arc<DiffSyncService>, channel: Arc<dyn Channel>) -> Result<()> {
    loop {
        let envelope = match channel.recv().await {
            Ok(envelope) => envelope,
            Err(ChannelError::Closed) => {
                tracing::debug!("Channel closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let entity = envelope.entity.clone();
        let identifier = envelope.identifier.clone();
        if let Err(e) = service.dispatch(envelope, channel.clone()).await {
            tracing::warn!("Rejected message from {} on {}: {}", identifier, entity, e);

            let reply = Message::End(End {
                reason: Some(e.to_string()),
            });
            match Envelope::seal(entity, identifier, &reply) {
                Ok(envelope) => {
                    if let Err(e) = channel.send(envelope).await {
                        tracing::warn!("Failed to send rejection: {}", e);
                    }
                }
                Err(e) => tracing::error!("Failed to seal rejection: {}", e),
            }
        }
    }
}

/// Spawn [`serve_channel`] on the runtime.
///
/// Returns a handle that can be used to await or abort the loop.
pub fn spawn_serve(
    service: Arc<DiffSyncService>,
    channel: Arc<dyn Channel>,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(serve_channel(service, channel))
}
