//! End-to-end flows against a live gateway driving the scripted engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mcu_engine::testing::{CallLog, EngineCall, MemoryChannel, ScriptedEngine};
use mcu_engine::{ExecutionController, OutputCapture};
use mcu_gateway::{EngineHandle, EventMessage, Gateway, GatewayConfig};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start(engine: ScriptedEngine, channel: MemoryChannel, config: GatewayConfig) -> SocketAddr {
    let controller = ExecutionController::new(engine, OutputCapture::new(Arc::new(channel)));
    let gateway = Gateway::new(config.clone(), EngineHandle::new(controller, config.slow_call_warn));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = gateway.serve(listener).await;
    });
    addr
}

async fn start_with(build: impl FnOnce(MemoryChannel) -> ScriptedEngine) -> (SocketAddr, CallLog) {
    let channel = MemoryChannel::new();
    let engine = build(channel.clone());
    let calls = engine.calls();
    let addr = start(engine, channel, GatewayConfig::default()).await;
    (addr, calls)
}

async fn open(addr: SocketAddr) -> Client {
    let (client, _) = assert_ok!(connect_async(format!("ws://{}", addr)).await);
    client
}

/// Connect and consume the greeting sequence.
async fn connect(addr: SocketAddr) -> Client {
    let mut client = open(addr).await;
    assert_eq!(next_event(&mut client).await, EventMessage::with_data("ready", "Hello"));
    assert_eq!(next_event(&mut client).await, EventMessage::log("connected"));
    assert_eq!(
        next_event(&mut client).await,
        EventMessage::with_data("console", "MCU initialized\n")
    );
    client
}

async fn recv(client: &mut Client) -> Option<Message> {
    tokio::time::timeout(WAIT, client.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|frame| frame.unwrap())
}

async fn next_event(client: &mut Client) -> EventMessage {
    loop {
        match recv(client).await {
            Some(Message::Text(text)) => return EventMessage::decode(&text).unwrap(),
            Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
            other => panic!("expected an event, got {:?}", other),
        }
    }
}

async fn send(client: &mut Client, message: serde_json::Value) {
    client.send(Message::Text(message.to_string())).await.unwrap();
}

/// Round-trip a ping; everything sent before it has been handled once the pong arrives.
async fn expect_pong(client: &mut Client) {
    send(client, json!({"event": "ping"})).await;
    assert_eq!(next_event(client).await, EventMessage::with_data("pong", "pong"));
}

#[tokio::test]
async fn test_connect_sends_ready_and_initializes() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let _client = connect(addr).await;
    assert_eq!(calls.take(), vec![EngineCall::Init]);
}

#[tokio::test]
async fn test_ping_pong() {
    let (addr, _) = start_with(ScriptedEngine::new).await;
    let mut client = connect(addr).await;
    expect_pong(&mut client).await;
}

#[tokio::test]
async fn test_websocket_ping_frame_answered() {
    let (addr, _) = start_with(ScriptedEngine::new).await;
    let mut client = connect(addr).await;

    client.send(Message::Ping(b"beat".to_vec())).await.unwrap();
    loop {
        match recv(&mut client).await {
            Some(Message::Pong(data)) => {
                assert_eq!(data, b"beat".to_vec());
                break;
            }
            Some(Message::Text(text)) => panic!("unexpected event {}", text),
            Some(_) => continue,
            None => panic!("connection closed"),
        }
    }
}

#[tokio::test]
async fn test_cycles_report_state() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let mut client = connect(addr).await;

    let mut last = 0;
    for _ in 0..3 {
        send(&mut client, json!({"event": "execute cycle"})).await;
        let event = next_event(&mut client).await;
        assert_eq!(event.event, "mcu state");

        let state = event.data.unwrap();
        let cycles = state["cycles"].as_u64().unwrap();
        assert!(cycles >= last);
        last = cycles;
        assert_eq!(state["data_memory"].as_array().unwrap().len(), 0x0900);
        assert_eq!(state["boot_section"], 32256);
        assert_eq!(state["RAM"], 256);
    }
    assert_eq!(calls.count(&EngineCall::ExecuteCycle), 3);
}

#[tokio::test]
async fn test_halt_then_resume() {
    let (addr, calls) = start_with(|ch| ScriptedEngine::new(ch).with_cycle_results([true, false])).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"event": "execute cycle"})).await;
    assert_eq!(next_event(&mut client).await.event, "mcu state");

    send(&mut client, json!({"event": "execute cycle"})).await;
    assert_eq!(
        next_event(&mut client).await,
        EventMessage::with_data("console", "BREAK\n")
    );
    assert_eq!(next_event(&mut client).await, EventMessage::new("execute stop"));
    assert_eq!(next_event(&mut client).await, EventMessage::log("MCU stopped"));

    // Halted: the cycle request produces nothing.
    send(&mut client, json!({"event": "execute cycle"})).await;
    expect_pong(&mut client).await;
    assert_eq!(calls.count(&EngineCall::ExecuteCycle), 2);

    send(&mut client, json!({"event": "mcu resume"})).await;
    assert_eq!(next_event(&mut client).await, EventMessage::new("mcu resumed"));

    send(&mut client, json!({"event": "execute cycle"})).await;
    let event = next_event(&mut client).await;
    assert_eq!(event.event, "mcu state");
    assert_eq!(event.data.unwrap()["stopped"], false);
}

#[tokio::test]
async fn test_compile_failure_keeps_session() {
    let (addr, calls) = start_with(|ch| ScriptedEngine::new(ch).with_load_result(false)).await;
    let mut client = connect(addr).await;
    calls.take();

    send(&mut client, json!({"event": "compile asm", "data": "NOP"})).await;
    assert_eq!(
        next_event(&mut client).await,
        EventMessage::with_data("console", "syntax error in assembly program\n")
    );
    assert_eq!(
        next_event(&mut client).await,
        EventMessage::log("assembly compilation failed")
    );
    assert_eq!(calls.take(), vec![EngineCall::LoadAsm("NOP".to_string())]);

    expect_pong(&mut client).await;
}

#[tokio::test]
async fn test_compile_success_is_quiet() {
    let (addr, _) = start_with(ScriptedEngine::new).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"event": "compile c", "data": "int main() { return 0; }"})).await;
    assert_eq!(next_event(&mut client).await, EventMessage::log("C program loaded"));
}

#[tokio::test]
async fn test_bad_payload_reported() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let mut client = connect(addr).await;
    calls.take();

    send(&mut client, json!({"event": "compile asm", "data": 5})).await;
    let event = next_event(&mut client).await;
    assert_eq!(event.event, "log");
    assert!(event.data.unwrap().as_str().unwrap().starts_with("compile asm failed"));
    assert!(calls.take().is_empty());

    expect_pong(&mut client).await;
}

#[tokio::test]
async fn test_echo_test_event() {
    let (addr, _) = start_with(ScriptedEngine::new).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"event": "test", "data": {"n": 7}})).await;
    assert_eq!(
        next_event(&mut client).await,
        EventMessage::with_data("test", json!({"n": 7}))
    );
}

#[tokio::test]
async fn test_unknown_event_ignored() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let mut client = connect(addr).await;
    calls.take();

    send(&mut client, json!({"event": "reboot", "data": 1})).await;
    expect_pong(&mut client).await;
    assert!(calls.take().is_empty());
}

#[tokio::test]
async fn test_unknown_event_reported_when_enabled() {
    let channel = MemoryChannel::new();
    let config = GatewayConfig {
        report_unknown_events: true,
        ..GatewayConfig::default()
    };
    let addr = start(ScriptedEngine::new(channel.clone()), channel, config).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"event": "reboot"})).await;
    assert_eq!(
        next_event(&mut client).await,
        EventMessage::log("unknown event: reboot")
    );
}

#[tokio::test]
async fn test_second_connection_rejected() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let mut first = connect(addr).await;

    let mut second = open(addr).await;
    let event = next_event(&mut second).await;
    assert_eq!(event.event, "log");
    match recv(&mut second).await {
        Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected close frame, got {:?}", other),
    }

    // The first session is untouched and the engine was initialized once.
    expect_pong(&mut first).await;
    assert_eq!(calls.count(&EngineCall::Init), 1);
}

#[tokio::test]
async fn test_malformed_input_ends_session() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let mut first = connect(addr).await;

    first.send(Message::Text("not json".to_string())).await.unwrap();
    loop {
        match recv(&mut first).await {
            Some(Message::Close(_)) | None => break,
            Some(Message::Text(text)) => panic!("unexpected event {}", text),
            Some(_) => continue,
        }
    }

    let mut second = connect(addr).await;
    assert_eq!(calls.count(&EngineCall::Init), 2);
    expect_pong(&mut second).await;
}

/// Connect once the previous session has released the slot.
async fn reconnect(addr: SocketAddr) -> Client {
    // Release happens on the server's side of the close; retry briefly.
    let mut attempts = 0;
    let mut client = loop {
        let mut client = open(addr).await;
        let event = next_event(&mut client).await;
        if event.event == "ready" {
            break client;
        }
        attempts += 1;
        assert!(attempts < 100, "slot never freed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(next_event(&mut client).await, EventMessage::log("connected"));
    assert_eq!(
        next_event(&mut client).await,
        EventMessage::with_data("console", "MCU initialized\n")
    );
    client
}

#[tokio::test]
async fn test_disconnect_frees_slot() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let mut first = connect(addr).await;
    first.close(None).await.unwrap();
    while let Some(Ok(_)) = first.next().await {}

    let _second = reconnect(addr).await;
    assert_eq!(calls.count(&EngineCall::Init), 2);
}

#[tokio::test]
async fn test_disconnect_during_engine_call() {
    let (addr, calls) = start_with(|channel| {
        ScriptedEngine::new(channel).with_cycle_delay(Duration::from_millis(300))
    })
    .await;
    let mut first = connect(addr).await;
    send(&mut first, json!({"event": "execute cycle"})).await;
    drop(first);

    // The session holds the slot until the cycle it started has finished.
    let mut early = open(addr).await;
    assert_eq!(next_event(&mut early).await.event, "log");

    let mut second = reconnect(addr).await;
    expect_pong(&mut second).await;
    assert_eq!(calls.count(&EngineCall::ExecuteCycle), 1);
    assert_eq!(calls.count(&EngineCall::Init), 2);
}

#[tokio::test]
async fn test_idle_socket_does_not_hold_slot() {
    let (addr, calls) = start_with(ScriptedEngine::new).await;
    let _idle = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut client = connect(addr).await;
    expect_pong(&mut client).await;
    assert_eq!(calls.count(&EngineCall::Init), 1);
}

#[tokio::test]
async fn test_stalled_handshake_dropped() {
    let channel = MemoryChannel::new();
    let config = GatewayConfig {
        handshake_timeout: Duration::from_millis(100),
        ..GatewayConfig::default()
    };
    let addr = start(ScriptedEngine::new(channel.clone()), channel, config).await;
    let mut idle = TcpStream::connect(addr).await.unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(WAIT, idle.read(&mut buf))
        .await
        .expect("server kept the stalled socket open");
    assert!(matches!(read, Ok(0) | Err(_)));
}
