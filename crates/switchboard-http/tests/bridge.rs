//! End-to-end tests: a real bridge on an ephemeral port, driven by
//! tokio-tungstenite clients and a scripted engine.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use switchboard_core::engine::testing::{streamed_reply, ScriptedEngine};
use switchboard_core::{AppContext, EngineEvent};
use switchboard_http::{start, BridgeConfig, BridgeHandle};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TOKEN: &str = "secret";

struct Harness {
    handle: BridgeHandle,
    ctx: AppContext,
    engine: Arc<ScriptedEngine>,
    _dir: TempDir,
}

impl Harness {
    async fn start(engine: ScriptedEngine) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let ctx = AppContext::builder(engine.clone())
            .sessions_dir(dir.path().to_path_buf())
            .default_model("gpt-5")
            .build();
        let handle = start(
            ctx.clone(),
            BridgeConfig {
                port: 0,
                token: Some(TOKEN.to_string()),
                serve_token_endpoint: true,
                shutdown_timeout: Duration::from_millis(500),
            },
        )
        .await
        .unwrap();
        Self {
            handle,
            ctx,
            engine,
            _dir: dir,
        }
    }

    fn url(&self, token: Option<&str>) -> String {
        let port = self.handle.local_addr().port();
        match token {
            Some(token) => format!("ws://127.0.0.1:{port}/ws?token={token}"),
            None => format!("ws://127.0.0.1:{port}/ws"),
        }
    }

    /// Connect and consume the on-connect snapshot.
    async fn connect(&self) -> (Client, Vec<Value>) {
        let before = self.handle.connection_count();
        let (mut client, _) = connect_async(self.url(Some(TOKEN))).await.unwrap();
        let mut snapshot = vec![recv(&mut client).await, recv(&mut client).await];
        if self.ctx.registry.get_active_session().is_some() {
            snapshot.push(recv(&mut client).await);
        }
        // Broadcasts only reach registered connections.
        wait_for(|| self.handle.connection_count() > before).await;
        (client, snapshot)
    }
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Read until a message of `kind` arrives.
async fn recv_type(client: &mut Client, kind: &str) -> Value {
    loop {
        let value = recv(client).await;
        if value["type"] == kind {
            return value;
        }
    }
}

async fn try_recv(client: &mut Client, wait: Duration) -> Option<Value> {
    match tokio::time::timeout(wait, client.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(text.as_str()).ok(),
        _ => None,
    }
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

mod connect {
    use super::*;

    #[tokio::test]
    async fn snapshot_includes_active_history() {
        let harness = Harness::start(ScriptedEngine::new()).await;
        let session = harness
            .ctx
            .registry
            .create_session("main", "", None)
            .await
            .unwrap();
        let scripted = harness.engine.sessions().pop().unwrap();

        // One finished turn, then a second prompt still in flight: 3 entries.
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send_prompt("one", CancellationToken::new()).await })
        };
        wait_for(|| session.is_processing()).await;
        scripted.emit(EngineEvent::ContentDelta {
            text: "reply".to_string(),
        });
        scripted.emit(EngineEvent::Idle);
        first.await.unwrap().unwrap();

        let second = session.clone();
        tokio::spawn(async move { second.send_prompt("two", CancellationToken::new()).await });
        wait_for(|| session.history().len() == 3).await;

        let (_client, snapshot) = harness.connect().await;

        assert_eq!(snapshot[0]["type"], "sessions_list");
        assert_eq!(snapshot[0]["payload"]["sessions"][0]["name"], "main");
        assert_eq!(snapshot[0]["payload"]["activeSession"], "main");
        assert_eq!(snapshot[1]["type"], "persisted_sessions");
        assert_eq!(snapshot[2]["type"], "session_history");
        assert_eq!(snapshot[2]["payload"]["sessionName"], "main");
        let messages = snapshot[2]["payload"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["content"], "reply");
        assert_eq!(messages[2]["content"], "two");
        assert_eq!(snapshot[2]["payload"]["isProcessing"], true);
    }

    #[tokio::test]
    async fn snapshot_without_sessions_has_no_history() {
        let harness = Harness::start(ScriptedEngine::new()).await;
        let (mut client, snapshot) = harness.connect().await;

        assert_eq!(snapshot[0]["payload"]["sessions"], json!([]));
        assert_eq!(snapshot[1]["payload"]["sessions"], json!([]));
        assert!(try_recv(&mut client, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn missing_or_wrong_token_is_rejected() {
        let harness = Harness::start(ScriptedEngine::new()).await;

        assert!(connect_async(harness.url(None)).await.is_err());
        assert!(connect_async(harness.url(Some("nope"))).await.is_err());
        assert_eq!(harness.handle.connection_count(), 0);
    }
}

mod commands {
    use super::*;

    #[tokio::test]
    async fn create_and_send_reach_every_client() {
        let harness = Harness::start(ScriptedEngine::with_reply(streamed_reply("Hello!"))).await;
        let (mut a, _) = harness.connect().await;
        let (mut b, _) = harness.connect().await;

        send(
            &mut a,
            json!({"type": "create_session", "payload": {"sessionName": "main"}}),
        )
        .await;
        for client in [&mut a, &mut b] {
            let list = recv_type(client, "sessions_list").await;
            assert_eq!(list["payload"]["sessions"][0]["name"], "main");
            assert_eq!(list["payload"]["sessions"][0]["model"], "gpt-5");
        }

        send(
            &mut a,
            json!({"type": "send_message", "payload": {"sessionName": "main", "text": "hi"}}),
        )
        .await;
        for client in [&mut a, &mut b] {
            let user = recv_type(client, "user_message").await;
            assert_eq!(user["payload"]["message"]["content"], "hi");
            let delta = recv_type(client, "content_delta").await;
            assert_eq!(delta["payload"]["content"], "Hello!");
            let complete = recv_type(client, "session_complete").await;
            assert_eq!(complete["payload"]["sessionName"], "main");
            assert_eq!(complete["payload"]["content"], "Hello!");
        }
    }

    #[tokio::test]
    async fn errors_go_only_to_the_requester() {
        let harness = Harness::start(ScriptedEngine::new()).await;
        let (mut a, _) = harness.connect().await;
        let (mut b, _) = harness.connect().await;

        send(
            &mut a,
            json!({"type": "send_message", "payload": {"sessionName": "ghost", "text": "hi"}}),
        )
        .await;

        let error = recv(&mut a).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["payload"]["sessionName"], "ghost");
        assert!(try_recv(&mut b, Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn busy_session_rejects_second_prompt() {
        let harness = Harness::start(ScriptedEngine::new()).await;
        harness
            .ctx
            .registry
            .create_session("main", "", None)
            .await
            .unwrap();
        let (mut client, _) = harness.connect().await;

        let prompt = json!({
            "type": "send_message",
            "payload": {"sessionName": "main", "text": "hi"}
        });
        send(&mut client, prompt.clone()).await;
        recv_type(&mut client, "user_message").await;
        send(&mut client, prompt).await;

        let error = recv_type(&mut client, "error").await;
        assert!(error["payload"]["message"]
            .as_str()
            .unwrap()
            .contains("already processing"));
        assert_eq!(
            harness.ctx.registry.get_session("main").unwrap().history().len(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_types_are_ignored_and_malformed_json_is_reported() {
        let harness = Harness::start(ScriptedEngine::new()).await;
        let (mut client, _) = harness.connect().await;

        send(&mut client, json!({"type": "ping", "payload": {}})).await;
        send(&mut client, json!({"type": "get_sessions"})).await;
        assert_eq!(recv(&mut client).await["type"], "sessions_list");

        client
            .send(Message::Text("{not json".to_string().into()))
            .await
            .unwrap();
        assert_eq!(recv(&mut client).await["type"], "error");
    }

    #[tokio::test]
    async fn queued_messages_are_sent_in_order() {
        let harness = Harness::start(ScriptedEngine::with_reply(streamed_reply("ok"))).await;
        harness
            .ctx
            .registry
            .create_session("main", "", None)
            .await
            .unwrap();
        let (mut client, _) = harness.connect().await;

        for text in ["first", "second", "third"] {
            send(
                &mut client,
                json!({"type": "queue_message", "payload": {"sessionName": "main", "text": text}}),
            )
            .await;
        }

        let scripted = harness.engine.sessions().pop().unwrap();
        wait_for(|| scripted.prompts().len() == 3).await;
        assert_eq!(scripted.prompts(), vec!["first", "second", "third"]);
        let session = harness.ctx.registry.get_session("main").unwrap();
        wait_for(|| !session.is_processing()).await;
        assert_eq!(session.history().len(), 6);
        assert!(session.queued_messages().is_empty());
    }

    #[tokio::test]
    async fn switch_close_and_clear() {
        let harness = Harness::start(ScriptedEngine::with_reply(streamed_reply("ok"))).await;
        let registry = &harness.ctx.registry;
        registry.create_session("a", "", None).await.unwrap();
        registry.create_session("b", "", None).await.unwrap();
        registry
            .get_session("b")
            .unwrap()
            .send_prompt("hi", CancellationToken::new())
            .await
            .unwrap();
        let (mut client, _) = harness.connect().await;

        send(
            &mut client,
            json!({"type": "switch_session", "payload": {"sessionName": "b"}}),
        )
        .await;
        let history = recv_type(&mut client, "session_history").await;
        assert_eq!(history["payload"]["sessionName"], "b");
        assert_eq!(history["payload"]["messages"].as_array().unwrap().len(), 2);
        assert_eq!(registry.active_session_name().as_deref(), Some("b"));

        send(
            &mut client,
            json!({"type": "clear_history", "payload": {"sessionName": "b"}}),
        )
        .await;
        let cleared = recv_type(&mut client, "session_history").await;
        assert_eq!(cleared["payload"]["messages"], json!([]));

        send(
            &mut client,
            json!({"type": "close_session", "payload": {"sessionName": "a"}}),
        )
        .await;
        // Earlier sessions_list broadcasts may still be in flight.
        let list = loop {
            let list = recv_type(&mut client, "sessions_list").await;
            if list["payload"]["sessions"].as_array().unwrap().len() == 1 {
                break list;
            }
        };
        let sessions = list["payload"]["sessions"].as_array().unwrap();
        assert_eq!(sessions[0]["name"], "b");
        assert!(registry.get_session("a").is_none());
    }
}

mod shutdown {
    use super::*;

    #[tokio::test]
    async fn stop_closes_connections() {
        let mut harness = Harness::start(ScriptedEngine::new()).await;
        let (mut client, _) = harness.connect().await;

        harness.handle.stop().await;

        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(ended.is_ok());
        assert_eq!(harness.handle.connection_count(), 0);
        assert!(!harness.handle.is_running());
    }

    #[tokio::test]
    async fn dropped_client_leaves_the_set() {
        let harness = Harness::start(ScriptedEngine::new()).await;
        let (client, _) = harness.connect().await;
        assert_eq!(harness.handle.connection_count(), 1);

        drop(client);

        wait_for(|| harness.handle.connection_count() == 0).await;
    }
}
