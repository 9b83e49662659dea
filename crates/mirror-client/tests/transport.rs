//! End-to-end tests for the push channel.
//!
//! Runs a real WebSocket server on a random local port that greets every connection with
//! a `hello` and relays whatever the test tells it to send.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mirror_client::{
    ChangeTransport, ConnectionState, EngineExit, LiveEngine, ReconnectConfig, SharedApi,
    TransportEvent, ViewKind,
};
use mirror_core::PushMessage;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Command {
    Send(String),
    Disconnect,
}

/// Local push-channel server.
struct TestServer {
    addr: SocketAddr,
    version: Arc<Mutex<String>>,
    commands: broadcast::Sender<Command>,
    connections: Arc<AtomicUsize>,
}

impl TestServer {
    async fn start(version: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let version = Arc::new(Mutex::new(version.to_string()));
        let (commands, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let server = Self {
            addr,
            version: Arc::clone(&version),
            commands: commands.clone(),
            connections: Arc::clone(&connections),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut rx = commands.subscribe();
                let version = version.lock().unwrap().clone();
                let connections = Arc::clone(&connections);

                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);

                    let hello = PushMessage::Hello { version }.to_text();
                    if ws.send(Message::Text(hello.into())).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            command = rx.recv() => match command {
                                Ok(Command::Send(text)) => {
                                    if ws.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(Command::Disconnect) | Err(_) => {
                                    let _ = ws.close(None).await;
                                    break;
                                }
                            },
                            incoming = ws.next() => match incoming {
                                Some(Ok(_)) => continue,
                                _ => break,
                            },
                        }
                    }
                });
            }
        });

        server
    }

    fn url(&self) -> String {
        format!("ws://{}/api/ws", self.addr)
    }

    fn send(&self, message: &PushMessage) {
        let _ = self.commands.send(Command::Send(message.to_text()));
    }

    fn send_raw(&self, text: &str) {
        let _ = self.commands.send(Command::Send(text.to_string()));
    }

    fn disconnect_all(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_string();
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        backoff_factor: 2.0,
    }
}

/// Next event that is not a state transition.
async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Option<TransportEvent> {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(TransportEvent::StateChanged(_)) => continue,
                other => return other,
            }
        }
    })
    .await
    .expect("Timeout waiting for transport event")
}

/// Wait for a specific connection state.
async fn wait_for_state(
    rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    wanted: impl Fn(ConnectionState) -> bool,
) {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(TransportEvent::StateChanged(state)) if wanted(state) => return,
                Some(_) => continue,
                None => panic!("Transport stopped"),
            }
        }
    })
    .await
    .expect("Timeout waiting for connection state");
}

fn changed(paths: &[&str]) -> PushMessage {
    PushMessage::FilesChanged {
        paths: paths.iter().map(|p| p.to_string()).collect(),
        repo: None,
    }
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_forwards_changed_paths() {
    let server = TestServer::start("v1").await;
    let (transport, handle, mut rx) = ChangeTransport::new(server.url(), fast_reconnect());
    let task = transport.spawn();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    assert_eq!(handle.state(), ConnectionState::Open);

    // Give the hello time to land before sending on the same socket
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.send(&changed(&["docs/a.md", "b.md"]));

    assert_eq!(
        next_event(&mut rx).await,
        Some(TransportEvent::Changed {
            paths: vec!["docs/a.md".into(), "b.md".into()],
            repo: None,
        })
    );

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_accepts_legacy_message_names_and_skips_garbage() {
    let server = TestServer::start("v1").await;
    let (transport, handle, mut rx) = ChangeTransport::new(server.url(), fast_reconnect());
    let _task = transport.spawn();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.send_raw("not json at all");
    server.send_raw(r#"{"type":"unknown"}"#);
    server.send_raw(r#"{"type":"changed","paths":["x.md"]}"#);

    assert_eq!(
        next_event(&mut rx).await,
        Some(TransportEvent::Changed {
            paths: vec!["x.md".into()],
            repo: None,
        })
    );
    handle.shutdown();
}

#[tokio::test]
async fn test_reconnects_and_reopens_after_drop() {
    let server = TestServer::start("v1").await;
    let (transport, handle, mut rx) = ChangeTransport::new(server.url(), fast_reconnect());
    let _task = transport.spawn();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.disconnect_all();
    wait_for_state(&mut rx, |s| s == ConnectionState::Closed { attempt: 1 }).await;

    // Every open triggers a full resync on the receiving side
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connections(), 2);
    handle.shutdown();
}

#[tokio::test]
async fn test_same_version_after_reconnect_is_not_a_reload() {
    let server = TestServer::start("v1").await;
    let (transport, handle, mut rx) = ChangeTransport::new(server.url(), fast_reconnect());
    let _task = transport.spawn();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.disconnect_all();
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));

    tokio::time::sleep(Duration::from_millis(50)).await;
    server.send(&changed(&["a.md"]));
    assert!(matches!(
        next_event(&mut rx).await,
        Some(TransportEvent::Changed { .. })
    ));
    handle.shutdown();
}

#[tokio::test]
async fn test_version_change_reported_exactly_once() {
    let server = TestServer::start("v1").await;
    let (transport, _handle, mut rx) = ChangeTransport::new(server.url(), fast_reconnect());
    let task = transport.spawn();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.set_version("v2");
    server.disconnect_all();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    assert_eq!(
        next_event(&mut rx).await,
        Some(TransportEvent::VersionChanged {
            previous: "v1".into(),
            current: "v2".into(),
        })
    );

    // The transport stops for good: no reconnect, no second report
    timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(next_event(&mut rx).await, None);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_user_activity_skips_backoff() {
    let server = TestServer::start("v1").await;
    let slow = ReconnectConfig {
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(60),
        backoff_factor: 2.0,
    };
    let (transport, handle, mut rx) = ChangeTransport::new(server.url(), slow);
    let _task = transport.spawn();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.disconnect_all();
    wait_for_state(&mut rx, |s| matches!(s, ConnectionState::Closed { .. })).await;

    handle.notify_activity();
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    handle.shutdown();
}

#[tokio::test]
async fn test_backoff_grows_while_server_is_down() {
    // Bind then drop to get a port with nothing listening
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let url = format!("ws://{}/api/ws", addr);
    let (transport, handle, mut rx) = ChangeTransport::new(url, fast_reconnect());
    let _task = transport.spawn();

    wait_for_state(&mut rx, |s| s == ConnectionState::Closed { attempt: 1 }).await;
    wait_for_state(&mut rx, |s| s == ConnectionState::Closed { attempt: 2 }).await;
    wait_for_state(&mut rx, |s| s == ConnectionState::Closed { attempt: 3 }).await;
    handle.shutdown();
}

#[tokio::test]
async fn test_shutdown_stops_reconnecting() {
    let server = TestServer::start("v1").await;
    let (transport, handle, mut rx) = ChangeTransport::new(server.url(), fast_reconnect());
    let task = transport.spawn();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Opened));
    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);
}

// ============================================================================
// Engine over a live channel
// ============================================================================

#[tokio::test]
async fn test_engine_applies_pushed_changes() {
    let server = TestServer::start("v1").await;
    let api = common::ScriptedApi::with_docs();
    let shared: SharedApi = api.clone();
    let engine = Arc::new(LiveEngine::new(shared, common::test_config(), None));
    engine.initialize().await;
    engine.load("a.md").await;

    let runner = Arc::clone(&engine);
    let url = server.url();
    let run = tokio::spawn(async move { runner.run(url).await });

    timeout(WAIT, async {
        while engine.snapshot().connection != ConnectionState::Open {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("engine never connected");
    tokio::time::sleep(Duration::from_millis(50)).await;

    api.tree.write("a.md", "# A\n\nedited");
    server.send(&changed(&["a.md"]));

    timeout(WAIT, async {
        loop {
            let state = engine.snapshot();
            if state.file.as_ref().is_some_and(|f| f.content.ends_with("edited")) {
                assert_eq!(state.view, ViewKind::File);
                assert!(state.is_recently_changed("a.md"));
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pushed change never applied");

    engine.shutdown();
    assert_eq!(
        timeout(WAIT, run).await.unwrap().unwrap(),
        EngineExit::Shutdown
    );
}

#[tokio::test]
async fn test_engine_exits_for_reload_on_new_build() {
    let server = TestServer::start("build-1").await;
    let api = common::ScriptedApi::with_docs();
    let shared: SharedApi = api.clone();
    let engine = Arc::new(LiveEngine::new(shared, common::test_config(), None));

    let runner = Arc::clone(&engine);
    let url = server.url();
    let run = tokio::spawn(async move { runner.run(url).await });

    timeout(WAIT, async {
        while !engine.snapshot().tree.is_populated() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("initial resync never ran");

    server.set_version("build-2");
    server.disconnect_all();

    assert_eq!(
        timeout(WAIT, run).await.unwrap().unwrap(),
        EngineExit::Reload {
            previous: "build-1".into(),
            current: "build-2".into(),
        }
    );
}

#[tokio::test]
async fn test_engine_shut_down_before_run_never_connects() {
    let server = TestServer::start("v1").await;
    let api = common::ScriptedApi::with_docs();
    let engine = common::engine(&api);

    engine.shutdown();
    let exit = timeout(WAIT, engine.run(server.url()))
        .await
        .expect("run kept reconnecting after shutdown");

    assert_eq!(exit, EngineExit::Shutdown);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn test_engine_shutdown_reaches_freshly_spawned_run() {
    let api = common::ScriptedApi::with_docs();
    let shared: SharedApi = api.clone();
    let engine = Arc::new(LiveEngine::new(shared, common::test_config(), None));

    // Nothing listens here, so the run would otherwise retry forever
    let runner = Arc::clone(&engine);
    let run = tokio::spawn(async move { runner.run("ws://127.0.0.1:1/api/ws".into()).await });
    engine.shutdown();

    assert_eq!(
        timeout(WAIT, run).await.unwrap().unwrap(),
        EngineExit::Shutdown
    );
}
