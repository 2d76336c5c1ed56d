use anyhow::Result;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{select, sync::mpsc};
use tracing::{debug, info, warn};

use crate::{
    hub::{Client, HubHandle},
    message::{
        ClientToServer, OutboundFrame, ServerToClient, decode_client_message, encode_frame,
    },
};

/// Drives one connection's read side until it fails, ends, or the hub shuts
/// down, then reports the client as gone.
///
/// `inbound` yields raw frame bytes. An `Err` item or the end of the stream
/// both count as a disconnect.
pub async fn run_connection<S>(mut inbound: S, mut client: Client, hub: &HubHandle)
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    info!(client_id = client.id, "client connected");

    loop {
        let frame = select! {
            biased;
            _ = hub.closed() => {
                debug!(client_id = client.id, "hub closed; ending connection");
                break;
            }
            frame = inbound.next() => frame,
        };

        match frame {
            Some(Ok(frame)) => {
                if !handle_frame(&frame, &mut client, hub).await {
                    break;
                }
            }
            Some(Err(err)) => {
                info!(client_id = client.id, error = ?err, "read failed; closing connection");
                break;
            }
            None => {
                info!(client_id = client.id, "client disconnected");
                break;
            }
        }
    }

    hub.leave(client).await;
}

/// Returns whether the read loop should continue.
async fn handle_frame(frame: &[u8], client: &mut Client, hub: &HubHandle) -> bool {
    match decode_client_message(frame) {
        Ok(Some(ClientToServer::Login { name })) => {
            client.name = name;
            hub.join(client.clone()).await
        }
        Ok(Some(ClientToServer::Message { text })) => {
            hub.publish(ServerToClient::Message {
                text,
                user: client.view(),
            })
            .await
        }
        Ok(None) => true,
        Err(err) => {
            warn!(client_id = client.id, error = %err, "protocol error; closing connection");
            false
        }
    }
}

/// Writes every frame the hub queues for this client to `sink`, in order.
///
/// Finishes once every sender is gone, closing the sink on the way out.
pub async fn forward_outbound<W>(
    mut outbound: mpsc::Receiver<OutboundFrame>,
    mut sink: W,
) -> Result<()>
where
    W: Sink<String> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(frame) = outbound.recv().await {
        let encoded = match encode_frame(&frame) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "failed to encode outbound frame");
                continue;
            }
        };
        sink.send(encoded).await?;
    }

    sink.close().await?;
    Ok(())
}
