//! WebSocket control endpoint
//!
//! One task per agent: the read loop feeds frames to a [`ControlHandler`],
//! and a writer task drains the session's outbound queue and sends pings.

use auger_control::{ControlHandler, HandlerAction, Outbound, SessionHandle, SessionRegistry};
use auger_proto::encode;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tracing::debug;

pub(crate) async fn serve_control(socket: WebSocket, registry: SessionRegistry, heartbeat: Duration) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut outbound) = SessionHandle::channel();
    let mut handler = ControlHandler::new(registry, handle.clone());

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
        loop {
            tokio::select! {
                item = outbound.recv() => match item {
                    Some(Outbound::Message(message)) => {
                        if sink.send(WsMessage::Text(encode(&message).into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let action = match frame {
            Ok(WsMessage::Text(text)) => handler.handle_text(text.as_str()),
            Ok(WsMessage::Binary(data)) => handler.handle_binary(&data),
            Ok(WsMessage::Close(_)) => break,
            // Pings are answered by axum; pongs need no handling
            Ok(_) => HandlerAction::Continue,
            Err(e) => {
                debug!("Control connection error: {}", e);
                break;
            }
        };

        if action == HandlerAction::Close {
            break;
        }
    }

    handler.on_close();
    handle.close();
    let _ = writer.await;
}
