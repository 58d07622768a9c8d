use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use wordspy_core::net::messages::{
    ClientMessage, CreateSpyGameMsg, JoinSpyGameMsg, ServerMessage, SpyGameCreatedMsg,
    SpyGameErrorMsg, SpyGameJoinedMsg,
};
use wordspy_core::net::protocol::{
    PROTOCOL_VERSION, decode_server_message, encode_client_message,
};

use wordspy_server::build_app;
use wordspy_server::config::ServerConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with default config on an ephemeral port.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a ClientMessage over a WS stream.
pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Send CreateSpyGame as the first message and return the creation
/// response, which carries the room code and an initial snapshot.
pub async fn ws_create_game(
    stream: &mut WsStream,
    user_id: &str,
    name: &str,
    max_players: u8,
) -> SpyGameCreatedMsg {
    let msg = ClientMessage::CreateSpyGame(CreateSpyGameMsg {
        user_id: user_id.to_string(),
        display_name: name.to_string(),
        max_players,
        protocol_version: PROTOCOL_VERSION,
    });
    ws_send_client_msg(stream, &msg).await;

    match ws_read_server_msg(stream).await {
        ServerMessage::SpyGameCreated(created) => *created,
        other => panic!("Expected SpyGameCreated, got: {other:?}"),
    }
}

/// Send JoinSpyGame as the first message and return the join response.
pub async fn ws_join_game(
    stream: &mut WsStream,
    user_id: &str,
    name: &str,
    room_code: &str,
) -> SpyGameJoinedMsg {
    let msg = ClientMessage::JoinSpyGame(JoinSpyGameMsg {
        user_id: user_id.to_string(),
        display_name: name.to_string(),
        room_code: room_code.to_string(),
        protocol_version: PROTOCOL_VERSION,
    });
    ws_send_client_msg(stream, &msg).await;

    match ws_read_server_msg(stream).await {
        ServerMessage::SpyGameJoined(joined) => *joined,
        other => panic!("Expected SpyGameJoined, got: {other:?}"),
    }
}

/// Send a create or join that is expected to fail; returns the error.
pub async fn ws_expect_join_error(stream: &mut WsStream, msg: &ClientMessage) -> SpyGameErrorMsg {
    ws_send_client_msg(stream, msg).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::SpyGameJoinError(err) => err,
        other => panic!("Expected SpyGameJoinError, got: {other:?}"),
    }
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read raw binary data, returning None on timeout.
pub async fn ws_try_read_raw(stream: &mut WsStream, timeout_ms: u64) -> Option<Vec<u8>> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

/// Read server messages until one matches the predicate (5s total).
pub async fn ws_expect<T>(
    stream: &mut WsStream,
    mut pick: impl FnMut(ServerMessage) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws_read_server_msg(stream).await;
            if let Some(out) = pick(msg) {
                return out;
            }
        }
    })
    .await
    .expect("Timed out waiting for expected message")
}
