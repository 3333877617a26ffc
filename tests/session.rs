//! End-to-end question flow against a fake RAG backend served on an
//! ephemeral port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures::StreamExt;

use askyourdocs::backend::RagClient;
use askyourdocs::extraction::ExtractionFacade;
use askyourdocs::models::{ChatMessage, Role, UploadedFile};
use askyourdocs::session::{ChatSession, SessionError, FAILURE_REPLY};
use askyourdocs::store::{MemoryStore, MessageStore};
use askyourdocs::stream::StreamOutcome;

type Params = HashMap<String, String>;

/// What the fake backend answers to `/query`.
#[derive(Clone, Copy)]
enum Answer {
    Chunks(&'static [&'static [u8]]),
    BreakAfter(&'static [u8]),
    StallAfter(&'static [u8]),
    Status(u16),
}

#[derive(Clone)]
struct Backend {
    answer: Answer,
    adds: Arc<Mutex<Vec<Params>>>,
    queries: Arc<Mutex<Vec<Params>>>,
}

async fn add(State(b): State<Backend>, Query(params): Query<Params>) -> Json<serde_json::Value> {
    b.adds.lock().unwrap().push(params);
    Json(serde_json::json!({ "status": "ok" }))
}

async fn query(State(b): State<Backend>, Query(params): Query<Params>) -> Response {
    b.queries.lock().unwrap().push(params);
    match b.answer {
        Answer::Chunks(parts) => {
            let items: Vec<Result<Bytes, std::io::Error>> =
                parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
            Body::from_stream(futures::stream::iter(items)).into_response()
        }
        Answer::BreakAfter(first) => {
            // the delay lets the head and first chunk reach the client before
            // the connection is torn down
            let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
                first,
            ))])
            .chain(futures::stream::once(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(std::io::Error::new(std::io::ErrorKind::Other, "backend crashed"))
            }));
            Body::from_stream(body).into_response()
        }
        Answer::StallAfter(first) => {
            let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
                first,
            ))])
            .chain(futures::stream::pending());
            Body::from_stream(body).into_response()
        }
        Answer::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            "model overloaded",
        )
            .into_response(),
    }
}

async fn spawn_backend(answer: Answer) -> (String, Backend) {
    let backend = Backend {
        answer,
        adds: Arc::default(),
        queries: Arc::default(),
    };
    let app = Router::new()
        .route("/add", post(add))
        .route("/query", post(query))
        .with_state(backend.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, backend)
}

fn session(url: &str, store: Arc<MemoryStore>) -> ChatSession {
    ChatSession::new(
        Some("u1".to_string()),
        Arc::new(ExtractionFacade::new()),
        store,
        RagClient::new(
            Some(url.to_string()),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ),
    )
}

fn msg(role: Role, content: &str) -> ChatMessage {
    ChatMessage {
        role,
        content: content.to_string(),
    }
}

#[tokio::test]
async fn answer_streams_and_is_persisted_with_document() {
    let (url, backend) = spawn_backend(Answer::Chunks(&[b"Hel", b"lo, ", b"world"])).await;
    let store = Arc::new(MemoryStore::new());
    let mut s = session(&url, store.clone());

    s.attach(UploadedFile::new("notes.md", b"the document body".to_vec()))
        .unwrap();
    let mut seen = Vec::new();
    let outcome = s
        .ask("What?", |text| seen.push(text.to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.stream, StreamOutcome::Completed("Hello, world".to_string()));
    assert!(outcome.persisted);
    assert_eq!(seen.last().map(String::as_str), Some("Hello, world"));
    assert!(seen.windows(2).all(|w| w[1].starts_with(w[0].as_str())));

    let adds = backend.adds.lock().unwrap().clone();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0]["text"], "the document body");
    assert_eq!(adds[0]["chat_id"], outcome.chat_id);
    assert_eq!(adds[0]["user_id"], "u1");

    let queries = backend.queries.lock().unwrap().clone();
    assert_eq!(queries[0]["q"], "What?");
    assert_eq!(queries[0]["chat_id"], outcome.chat_id);

    let history = store.list_messages(&outcome.chat_id).await.unwrap();
    assert_eq!(
        history,
        vec![msg(Role::User, "What?"), msg(Role::Assistant, "Hello, world")]
    );

    assert!(s.attachment().is_none());
    let shown = s.messages();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].file.as_deref(), Some("notes.md"));
    assert_eq!(shown[1].content, "Hello, world");
}

#[tokio::test]
async fn follow_up_question_reuses_the_chat() {
    let (url, backend) = spawn_backend(Answer::Chunks(&[b"ok"])).await;
    let store = Arc::new(MemoryStore::new());
    let mut s = session(&url, store.clone());

    let first = s.ask("one", |_| {}).await.unwrap();
    let second = s.ask("two", |_| {}).await.unwrap();
    assert_eq!(first.chat_id, second.chat_id);
    assert_eq!(store.list_chat_titles("u1").await.unwrap().len(), 1);
    assert_eq!(store.list_messages(&first.chat_id).await.unwrap().len(), 4);
    // no document attached, so nothing indexed
    assert!(backend.adds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn split_multibyte_character_is_decoded_once() {
    let (url, _backend) = spawn_backend(Answer::Chunks(&[b"caf\xC3", b"\xA9 au lait"])).await;
    let store = Arc::new(MemoryStore::new());
    let mut s = session(&url, store.clone());

    let outcome = s.ask("drink?", |_| {}).await.unwrap();
    assert_eq!(outcome.stream.text(), "café au lait");
    let history = store.list_messages(&outcome.chat_id).await.unwrap();
    assert_eq!(history[1].content, "café au lait");
}

#[tokio::test]
async fn broken_stream_ends_in_failure_reply_without_persisting() {
    let (url, _backend) = spawn_backend(Answer::BreakAfter(b"partial ")).await;
    let store = Arc::new(MemoryStore::new());
    let mut s = session(&url, store.clone());

    let mut seen = Vec::new();
    let outcome = s
        .ask("question", |text| seen.push(text.to_string()))
        .await
        .unwrap();
    assert!(matches!(outcome.stream, StreamOutcome::Failed { .. }));
    assert_eq!(outcome.stream.text(), "partial ");
    assert_eq!(seen.last().map(String::as_str), Some("partial "));
    assert!(!outcome.persisted);
    assert_eq!(s.messages().last().unwrap().content, FAILURE_REPLY);

    let history = store.list_messages(&outcome.chat_id).await.unwrap();
    assert_eq!(history, vec![msg(Role::User, "question")]);
}

#[tokio::test]
async fn backend_error_status_is_not_read_as_an_answer() {
    let (url, _backend) = spawn_backend(Answer::Status(503)).await;
    let store = Arc::new(MemoryStore::new());
    let mut s = session(&url, store.clone());

    let mut updates = 0;
    let err = s.ask("question", |_| updates += 1).await.unwrap_err();
    assert!(matches!(err, SessionError::Backend(_)));
    assert_eq!(updates, 0);
    assert_eq!(s.messages().last().unwrap().content, FAILURE_REPLY);

    let chat_id = s.current_chat().unwrap().to_string();
    assert_eq!(store.list_messages(&chat_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancelling_a_stalled_answer_stops_the_stream() {
    let (url, _backend) = spawn_backend(Answer::StallAfter(b"thinking")).await;
    let store = Arc::new(MemoryStore::new());
    let mut s = session(&url, store.clone());

    let cancel = tokio_util::sync::CancellationToken::new();
    let trigger = cancel.clone();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        s.ask_with_cancel("slow?", cancel, move |_| trigger.cancel()),
    )
    .await
    .expect("cancelled reader must return")
    .unwrap();

    assert!(matches!(outcome.stream, StreamOutcome::Cancelled { ref partial } if partial == "thinking"));
    assert!(!outcome.persisted);
    assert_eq!(s.messages().last().unwrap().content, FAILURE_REPLY);
    assert_eq!(store.message_count(), 1);
}
