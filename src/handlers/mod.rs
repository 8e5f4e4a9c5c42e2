mod connection;

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::MAX_FRAME_SIZE;
use crate::context::AppContext;
use crate::frame::{ClientFrame, ServerFrame};
use crate::metrics;
use crate::presence::{self, TypingTarget};
use crate::registry::{ConnectionEntry, Outbound};
use crate::distribution;
use connection::{ConnectionHandler, WebSocketStreamType};

pub async fn handle_websocket(ws_stream: WebSocketStreamType, addr: SocketAddr, ctx: AppContext) {
    metrics::CONNECTIONS_TOTAL.inc();
    let span = tracing::info_span!("websocket_connection", addr = %addr);
    let _enter = span.enter();

    tracing::info!("New connection from: {}", addr);

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let mut handler = ConnectionHandler::new(ws_sender, tx, addr);
    if handler.send_frame(&ServerFrame::Welcome).await.is_err() {
        return;
    }

    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(ctx.config.heartbeat_interval_secs));
    // the first tick fires immediately; skip it so the ping cadence starts
    // one full period after connect
    heartbeat.tick().await;
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            Some(msg) = ws_receiver.next() => {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if text.len() > MAX_FRAME_SIZE {
                            handler.send_error("Frame too large").await;
                            continue;
                        }
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(client_frame) => {
                                if let ClientFrame::Pong {} = client_frame {
                                    missed_pongs = 0;
                                }
                                dispatch_frame(&mut handler, &ctx, client_frame).await;
                            }
                            Err(e) => {
                                tracing::warn!(addr = %addr, error = %e, "Rejected malformed frame");
                                handler.send_error("Invalid message format").await;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!("Connection closed by client: {}", addr);
                        break;
                    }
                    Ok(WsMessage::Ping(data)) => {
                        let _ = handler.ws_sender_mut().send(WsMessage::Pong(data)).await;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    _ => {}
                }
            }

            Some(outbound) = rx.recv() => {
                match outbound {
                    Outbound::Frame(server_frame) => {
                        if handler.send_frame(&server_frame).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        tracing::info!(addr = %addr, "Closing superseded connection");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if missed_pongs >= ctx.config.heartbeat_miss_limit {
                    tracing::warn!(addr = %addr, missed = missed_pongs, "Heartbeat miss limit reached, closing");
                    break;
                }
                if handler.send_frame(&ServerFrame::Ping).await.is_err() {
                    break;
                }
                missed_pongs += 1;
            }
        }
    }

    if let Some((user_id, _)) = handler.authenticated() {
        ctx.registry.unregister(user_id, handler.connection_id).await;
    }
    tracing::info!("Connection closed: {}", addr);
}

async fn dispatch_frame(handler: &mut ConnectionHandler, ctx: &AppContext, client_frame: ClientFrame) {
    match client_frame {
        ClientFrame::Auth { user_id, username } => {
            handle_auth(handler, ctx, user_id, username).await;
        }

        ClientFrame::Pong {} => {
            if let Some((user_id, _)) = handler.authenticated() {
                ctx.registry.touch(user_id, handler.connection_id).await;
            }
        }

        ClientFrame::ChannelMessage {
            channel_id,
            message,
        } => {
            let Some((user_id, _)) = handler.authenticated() else {
                handler.send_error("Authentication required").await;
                return;
            };
            if let Err(e) =
                distribution::send_channel_message(ctx, user_id, channel_id, message).await
            {
                e.log();
                handler.send_error(&e.user_message()).await;
            }
        }

        ClientFrame::DirectMessage {
            receiver_id,
            message,
        } => {
            let Some((user_id, _)) = handler.authenticated() else {
                handler.send_error("Authentication required").await;
                return;
            };
            if let Err(e) =
                distribution::send_direct_message(ctx, user_id, receiver_id, message).await
            {
                e.log();
                handler.send_error(&e.user_message()).await;
            }
        }

        ClientFrame::Typing {
            receiver_id,
            channel_id,
            is_typing,
        } => {
            let Some((user_id, username)) = handler.authenticated() else {
                handler.send_error("Authentication required").await;
                return;
            };
            let target = match TypingTarget::from_ids(receiver_id, channel_id) {
                Ok(target) => target,
                Err(e) => {
                    handler.send_error(&e.user_message()).await;
                    return;
                }
            };
            if let Err(e) =
                presence::publish_typing(ctx, user_id, &username, target, is_typing).await
            {
                e.log();
                handler.send_error(&e.user_message()).await;
            }
        }
    }
}

async fn handle_auth(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    user_id: uuid::Uuid,
    username: String,
) {
    let user = match ctx.storage.get_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(user_id = %user_id, "Auth for unknown user");
            handler.send_error("Unknown user").await;
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "Auth lookup failed");
            handler.send_error("Authentication temporarily unavailable").await;
            return;
        }
    };

    handler.set_authenticated(user.id, user.username.clone());
    ctx.registry
        .register(
            user.id,
            ConnectionEntry {
                connection_id: handler.connection_id,
                username: user.username.clone(),
                tx: handler.tx().clone(),
                last_seen: chrono::Utc::now(),
            },
        )
        .await;

    tracing::info!(user_id = %user.id, username = %user.username, supplied = %username, "Socket authenticated");

    let _ = handler
        .send_frame(&ServerFrame::AuthSuccess {
            user_id: user.id,
            username: user.username.clone(),
        })
        .await;

    // current storage state so a freshly connected client knows the mode
    let snapshot = ctx.availability.snapshot().await;
    let _ = handler
        .send_frame(&ServerFrame::DatabaseStatus {
            connected: snapshot.is_available,
            timestamp: snapshot.last_checked_at.unwrap_or_else(chrono::Utc::now),
        })
        .await;
}
