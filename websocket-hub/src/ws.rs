use std::{future, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    connection::{forward_outbound, run_connection},
    hub::HubHandle,
};

/// How long the writer may keep flushing after the read side has ended.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

pub fn router(hub: HubHandle) -> Router {
    Router::new().route("/", get(ws_upgrade)).with_state(hub)
}

async fn ws_upgrade(State(hub): State<HubHandle>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

async fn serve_socket(socket: WebSocket, hub: HubHandle) {
    let (client, outbound) = hub.new_client();
    let client_id = client.id;

    let (sink, stream) = socket.split();
    let sink = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
    let mut writer = tokio::spawn(forward_outbound(outbound, sink));

    let inbound = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| future::ready(into_frame(message)));
    tokio::pin!(inbound);

    run_connection(inbound, client, &hub).await;

    // The hub drops its copy of the outbound sender once it has processed the
    // leave, which lets the writer flush what is queued and close the socket.
    match timeout(WRITER_DRAIN, &mut writer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => debug!(client_id, error = ?err, "writer stopped with error"),
        Ok(Err(err)) => warn!(client_id, error = ?err, "writer task failed"),
        Err(_) => {
            debug!(client_id, "writer did not drain in time; aborting");
            writer.abort();
        }
    }
}

/// Maps a websocket message to frame bytes. Control frames are skipped.
fn into_frame(message: Result<Message, axum::Error>) -> Option<Result<Vec<u8>>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
        Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(err) => Some(Err(err.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_binary_frames_carry_bytes() {
        let text = into_frame(Ok(Message::Text("{}".into())))
            .expect("frame")
            .expect("ok");
        assert_eq!(text, b"{}".to_vec());

        let binary = into_frame(Ok(Message::Binary(b"{}".to_vec())))
            .expect("frame")
            .expect("ok");
        assert_eq!(binary, b"{}".to_vec());
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(into_frame(Ok(Message::Ping(vec![1]))).is_none());
        assert!(into_frame(Ok(Message::Pong(vec![1]))).is_none());
    }
}
