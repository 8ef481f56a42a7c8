//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ConnId, ServerMsg};

/// WebSocket upgrade handler. Connections are anonymous until they join.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id: ConnId = Uuid::new_v4();
    info!(conn_id = %conn_id, connections = state.hub.len() + 1, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    let outbound = state.hub.register(conn_id);
    state
        .hub
        .send_to(conn_id, ServerMsg::Connected { id: conn_id });

    run_session(conn_id, &state, ws_sink, ws_stream, outbound).await;

    // Unregister first so nothing is queued for a dead socket
    state.hub.unregister(conn_id);
    state.coordinator.disconnected(conn_id).await;

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    conn_id: ConnId,
    state: &AppState,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut outbound: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);

    // Writer task: hub queue -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> coordinator
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(conn_id = %conn_id, "Rate limited input message");
                    continue;
                }

                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                };
                if !client_msg.is_well_formed() {
                    warn!(conn_id = %conn_id, event = client_msg.name(), "Dropping malformed event");
                    continue;
                }

                if !state.coordinator.client_event(conn_id, client_msg).await {
                    debug!(conn_id = %conn_id, "Coordinator channel closed");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::config::Config;
    use crate::game::coordinator::Command;
    use crate::game::CoordinatorHandle;
    use crate::http::build_router;
    use crate::ws::hub::ConnectionHub;

    const WAIT: Duration = Duration::from_secs(5);

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Serve the real router with a bare command channel standing in for the coordinator
    async fn serve(input_rate_limit: u32) -> (SocketAddr, ConnectionHub, mpsc::Receiver<Command>) {
        let config = Config {
            input_rate_limit,
            ..Config::for_tests()
        };
        let hub = ConnectionHub::new();
        let (coordinator, commands) = CoordinatorHandle::detached(64);
        let state = AppState {
            config: Arc::new(config),
            hub: hub.clone(),
            coordinator,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        (addr, hub, commands)
    }

    async fn connect(addr: SocketAddr) -> (Client, ConnId) {
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let first = tokio::time::timeout(WAIT, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let WsMessage::Text(text) = first else {
            panic!("expected a text frame first");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["event"], "connected");
        let id = json["data"]["id"].as_str().unwrap().parse().unwrap();
        (client, id)
    }

    async fn next_command(commands: &mut mpsc::Receiver<Command>) -> Command {
        tokio::time::timeout(WAIT, commands.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn assert_no_command(commands: &mut mpsc::Receiver<Command>) {
        let pending = tokio::time::timeout(Duration::from_millis(200), commands.recv()).await;
        assert!(pending.is_err(), "unexpected command forwarded");
    }

    #[tokio::test]
    async fn connected_is_first_and_only_valid_events_are_forwarded() {
        let (addr, hub, mut commands) = serve(60).await;
        let (mut client, id) = connect(addr).await;
        assert_eq!(hub.len(), 1);

        client.send(WsMessage::binary(vec![1u8, 2, 3])).await.unwrap();
        client.send(WsMessage::text("not json")).await.unwrap();
        client
            .send(WsMessage::text(r#"{"event":"becomeKiller","data":true}"#))
            .await
            .unwrap();
        client
            .send(WsMessage::text(
                r#"{"event":"playerMove","data":{"x":1e999,"y":0,"z":0}}"#,
            ))
            .await
            .unwrap();
        client
            .send(WsMessage::text(r#"{"event":"joinGame","data":"Red Team"}"#))
            .await
            .unwrap();

        match next_command(&mut commands).await {
            Command::Client { conn_id, msg } => {
                assert_eq!(conn_id, id);
                assert_eq!(msg, ClientMsg::JoinGame("Red Team".to_string()));
            }
            _ => panic!("expected the join to be forwarded first"),
        }
        assert_no_command(&mut commands).await;
    }

    #[tokio::test]
    async fn disconnect_reported_once_after_unregistering() {
        let (addr, hub, mut commands) = serve(60).await;
        let (mut client, id) = connect(addr).await;
        client.close(None).await.unwrap();

        match next_command(&mut commands).await {
            Command::Disconnected { conn_id } => {
                assert_eq!(conn_id, id);
                assert!(hub.is_empty());
            }
            _ => panic!("expected a disconnect"),
        }
        assert_no_command(&mut commands).await;
    }

    #[tokio::test]
    async fn input_over_rate_is_dropped() {
        let (addr, _hub, mut commands) = serve(1).await;
        let (mut client, id) = connect(addr).await;

        for name in ["A", "B", "C", "D"] {
            let frame = format!(r#"{{"event":"joinGame","data":"{name}"}}"#);
            client.send(WsMessage::text(frame)).await.unwrap();
        }
        client.close(None).await.unwrap();

        match next_command(&mut commands).await {
            Command::Client { msg, .. } => assert_eq!(msg, ClientMsg::JoinGame("A".to_string())),
            _ => panic!("expected the first join"),
        }
        match next_command(&mut commands).await {
            Command::Disconnected { conn_id } => assert_eq!(conn_id, id),
            _ => panic!("frames over the rate limit reached the coordinator"),
        }
    }
}
