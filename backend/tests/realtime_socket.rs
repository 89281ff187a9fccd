use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use gatehouse_backend::{models::user::UserRole, utils::cookies::SESSION_COOKIE_NAME};
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

mod support;

use support::{peer, seed_user, spawn_app, Client, TestApp, PASSWORD};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });
    addr
}

async fn signed_in_token(app: &TestApp, email: &str, role: UserRole, n: u8) -> String {
    seed_user(app, email, role).await;
    let mut client = Client::new(peer(n));
    client.login(app, email, PASSWORD).await;
    client
        .cookie(SESSION_COOKIE_NAME)
        .expect("session cookie")
        .to_string()
}

async fn open(addr: SocketAddr, session: Option<&str>) -> Socket {
    let mut request = format!("ws://{addr}/api/ws")
        .into_client_request()
        .expect("ws request");
    if let Some(token) = session {
        let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={token}"))
            .expect("cookie header");
        request.headers_mut().insert(header::COOKIE, cookie);
    }
    let (socket, _) = timeout(WAIT, connect_async(request))
        .await
        .expect("connect in time")
        .expect("connect");
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::text(frame.to_string()))
        .await
        .expect("send frame");
}

async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let message = timeout(WAIT, socket.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("read frame");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn close_code(socket: &mut Socket) -> u16 {
    loop {
        let message = timeout(WAIT, socket.next())
            .await
            .expect("close in time")
            .expect("socket open")
            .expect("read frame");
        match message {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Close(None) => panic!("close frame without a code"),
            _ => continue,
        }
    }
}

async fn wait_until_no_connections(app: &TestApp) {
    for _ in 0..100 {
        if app.state.hub.connection_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "{} connections still registered",
        app.state.hub.connection_count()
    );
}

#[tokio::test]
async fn session_cookie_attaches_the_user_and_gates_rooms() {
    let app = spawn_app();
    let token = signed_in_token(&app, "ed@example.com", UserRole::Editor, 1).await;
    let addr = serve(&app).await;

    let mut editor = open(addr, Some(&token)).await;
    let welcome = next_frame(&mut editor).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["payload"]["authenticated"], true);
    assert_eq!(
        welcome["payload"]["rooms"],
        json!(["lobby", "members", "editors"])
    );

    let mut anonymous = open(addr, None).await;
    let welcome = next_frame(&mut anonymous).await;
    assert_eq!(welcome["payload"]["authenticated"], false);
    assert_eq!(welcome["payload"]["rooms"], json!(["lobby"]));

    send(
        &mut anonymous,
        json!({ "type": "subscribe", "payload": { "room": "editors" }, "id": "a1" }),
    )
    .await;
    let denied = next_frame(&mut anonymous).await;
    assert_eq!(denied["type"], "error");
    assert_eq!(denied["payload"]["code"], "FORBIDDEN");
    assert_eq!(denied["id"], "a1");

    send(
        &mut editor,
        json!({ "type": "subscribe", "payload": { "room": "editors" } }),
    )
    .await;
    assert_eq!(next_frame(&mut editor).await["type"], "subscribed");

    send(
        &mut editor,
        json!({ "type": "message", "payload": { "room": "editors", "content": "draft ready" } }),
    )
    .await;
    let delivered = next_frame(&mut editor).await;
    assert_eq!(delivered["type"], "message");
    assert_eq!(delivered["payload"]["content"], "draft ready");
    assert_eq!(delivered["payload"]["from"]["displayName"], "ed");
    assert_eq!(delivered["payload"]["from"]["role"], "editor");
}

#[tokio::test]
async fn unknown_session_cookie_connects_anonymously() {
    let app = spawn_app();
    let addr = serve(&app).await;

    let mut socket = open(addr, Some("not-a-session")).await;
    let welcome = next_frame(&mut socket).await;

    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["payload"]["authenticated"], false);
}

#[tokio::test]
async fn non_json_text_closes_with_protocol_error() {
    let app = spawn_app();
    let addr = serve(&app).await;
    let mut socket = open(addr, None).await;
    next_frame(&mut socket).await;

    socket
        .send(Message::text("definitely not json"))
        .await
        .expect("send");

    assert_eq!(close_code(&mut socket).await, 1002);
    wait_until_no_connections(&app).await;
}

#[tokio::test]
async fn binary_frames_close_with_unsupported_data() {
    let app = spawn_app();
    let addr = serve(&app).await;
    let mut socket = open(addr, None).await;
    next_frame(&mut socket).await;

    socket
        .send(Message::binary(vec![1u8, 2, 3]))
        .await
        .expect("send");

    assert_eq!(close_code(&mut socket).await, 1003);
    wait_until_no_connections(&app).await;
}

#[tokio::test]
async fn client_disconnect_removes_room_membership() {
    let app = spawn_app();
    let token = signed_in_token(&app, "mo@example.com", UserRole::Member, 2).await;
    let addr = serve(&app).await;

    let mut socket = open(addr, Some(&token)).await;
    next_frame(&mut socket).await;
    send(
        &mut socket,
        json!({ "type": "subscribe", "payload": { "room": "members" } }),
    )
    .await;
    assert_eq!(next_frame(&mut socket).await["type"], "subscribed");
    assert_eq!(app.state.hub.members("members").len(), 1);

    socket.close(None).await.expect("close");
    drop(socket);

    wait_until_no_connections(&app).await;
    assert!(app.state.hub.members("members").is_empty());
}
