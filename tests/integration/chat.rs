#[path = "../support/mock.rs"]
mod mock;

use chat_sync::connection::ConnectionState;
use chat_sync::error::ChatError;
use chat_sync::events::{ClientEvent, ServerEvent, TypingEvent};
use chat_sync::types::Pagination;
use chat_sync::{ChatClient, Config};

use mock::{ai_msg, user_msg, wait_until, LinkHandle, MockHistory, ScriptedTransport};

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.auth.token = Some("integration-token".to_string());
    cfg
}

fn page_one(total: u64) -> Pagination {
    Pagination {
        page: 1,
        per_page: 15,
        total,
    }
}

type Links = tokio::sync::mpsc::UnboundedReceiver<LinkHandle>;

async fn connected_client() -> (ChatClient, std::sync::Arc<MockHistory>, LinkHandle, Links) {
    mock::init_tracing();
    let (transport, mut links) = ScriptedTransport::always_ok();
    let history = MockHistory::new();
    let client = ChatClient::with_parts(config(), transport, history.clone());
    assert!(client.start().await);
    wait_until(|| client.connection.state() == ConnectionState::Connected).await;
    let link = links.recv().await.expect("link");
    (client, history, link, links)
}

#[tokio::test(start_paused = true)]
async fn test_reply_appends_and_clears_typing() {
    let (client, history, link, _links) = connected_client().await;
    history.set_page(
        "c1",
        1,
        vec![
            user_msg("m1", "c1", "my sink is leaking", 100),
            ai_msg("m2", "c1", "can you send a photo?", 200),
        ],
        page_one(2),
    );
    client.conversation.open_conversation("c1", None).await.unwrap();

    // The assistant starts typing, then the reply lands.
    link.server_tx
        .send(Ok(ServerEvent::UserTyping(TypingEvent {
            contact_id: "c1".to_string(),
            estimate_id: None,
            is_typing: true,
        })))
        .unwrap();
    wait_until(|| client.conversation.is_typing()).await;

    link.server_tx
        .send(Ok(ServerEvent::AiMessage(ai_msg(
            "m3",
            "c1",
            "a plumber will reach out today",
            300,
        ))))
        .unwrap();
    wait_until(|| client.conversation.messages().len() == 3).await;

    let texts: Vec<_> = client
        .conversation
        .messages()
        .iter()
        .map(|m| m.text.clone())
        .collect();
    assert_eq!(
        texts,
        vec![
            "my sink is leaking",
            "can you send a photo?",
            "a plumber will reach out today"
        ]
    );
    assert!(!client.conversation.is_typing());
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_confirm_broadcast_lands_once() {
    let (client, history, mut link, _links) = connected_client().await;
    history.set_page("c1", 1, vec![], page_one(0));
    client.conversation.open_conversation("c1", None).await.unwrap();

    assert!(client
        .conversation
        .send_message("book me for tuesday", vec![])
        .await
        .unwrap());
    // One send in flight at a time.
    assert!(!client
        .conversation
        .send_message("impatient retry", vec![])
        .await
        .unwrap());

    let sent = match link.sent_rx.recv().await {
        Some(ClientEvent::UserMessage { text, contact_id, .. }) => {
            assert_eq!(contact_id, "c1");
            text
        }
        other => panic!("unexpected emission: {other:?}"),
    };
    assert!(link.sent_rx.try_recv().is_err());

    // Save confirmation, then the broadcast echo of the same message.
    let now = chrono::Utc::now().timestamp();
    let mut confirmation = user_msg("m10", "c1", &sent, now);
    confirmation.id = None;
    link.server_tx
        .send(Ok(ServerEvent::MessageSaved(confirmation)))
        .unwrap();
    wait_until(|| !client.conversation.is_sending()).await;

    link.server_tx
        .send(Ok(ServerEvent::MessageSaved(user_msg(
            "m10", "c1", &sent, now,
        ))))
        .unwrap();

    // The duplicate never lands; a followup send goes through.
    wait_until(|| !client.conversation.messages().is_empty()).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(client.conversation.messages().len(), 1);
    assert!(client
        .conversation
        .send_message("see you then", vec![])
        .await
        .unwrap());
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_server_close_keeps_messages() {
    let (client, history, link, mut links) = connected_client().await;
    history.set_page(
        "c1",
        1,
        vec![user_msg("m1", "c1", "hello", 100)],
        page_one(1),
    );
    client.conversation.open_conversation("c1", None).await.unwrap();
    link.server_tx
        .send(Ok(ServerEvent::UserTyping(TypingEvent {
            contact_id: "c1".to_string(),
            estimate_id: None,
            is_typing: true,
        })))
        .unwrap();
    wait_until(|| client.conversation.is_typing()).await;

    // Server drops the connection; the client reconnects on its own and
    // transient indicators reset while history stays put.
    drop(link.server_tx);
    wait_until(|| !client.conversation.is_typing()).await;
    let _replacement = links.recv().await.expect("replacement link");
    wait_until(|| client.connection.state() == ConnectionState::Connected).await;
    assert_eq!(client.conversation.messages().len(), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_surfaces_terminal_failure() {
    mock::init_tracing();
    let (transport, _links) =
        ScriptedTransport::failing(ChatError::Auth("bad token".to_string()), 1);
    let history = MockHistory::new();
    let client = ChatClient::with_parts(config(), transport.clone(), history);

    assert!(client.start().await);
    wait_until(|| client.connection.state() == ConnectionState::Failed).await;
    assert!(matches!(
        client.connection.last_error(),
        Some(ChatError::Auth(_))
    ));
    assert_eq!(transport.open_count(), 1);
    client.shutdown().await;
}
