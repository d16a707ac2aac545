//! Pumps frames between an upgraded socket and its engine connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::adapters::engine::{WebSocketLink, WsCommand};
use crate::domain::engine::Frame;

/// Runs for the lifetime of the socket.
///
/// The writer drains the connection's outbound commands; the reader hands
/// every frame to the connection. Whichever side stops first ends both.
pub(super) async fn pump(socket: WebSocket, mut link: WebSocketLink) {
    let Some(mut outbound) = link.take_outbound() else {
        return;
    };
    let sid = link.sid().clone();
    let link = Arc::new(link);
    let (mut sender, mut receiver) = socket.split();

    let writer_sid = sid.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(command) = outbound.recv().await {
            let message = match command {
                WsCommand::Send(Frame::Text(text)) => Message::Text(text),
                WsCommand::Send(Frame::Binary(bytes)) => Message::Binary(bytes),
                WsCommand::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = sender.send(message).await {
                tracing::debug!(sid = %writer_sid, "send error, closing socket: {}", e);
                break;
            }
        }
    });

    let reader = Arc::clone(&link);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => reader.on_frame(Frame::Text(text)),
                Ok(Message::Binary(bytes)) => reader.on_frame(Frame::Binary(bytes)),
                // Protocol-level ping/pong is answered by axum
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!(sid = %sid, "receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    link.on_close();
}
