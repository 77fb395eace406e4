//! End-to-end tests: a real server and real clients over the OS channel.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pipe_rpc::registry::{METHOD_FAILED_MESSAGE, METHOD_NOT_FOUND_MESSAGE};
use pipe_rpc::transport::generate_channel_name;
use pipe_rpc::{
    CancellationToken, ClientState, Logger, PipeClient, PipeRpcError, PipeServer, Request,
    Response,
};

const TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Default)]
struct RecordingLogger {
    lines: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingLogger {
    fn lines(&self, level: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(("error", message.to_string()));
    }

    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(("info", message.to_string()));
    }

    fn debug(&self, message: &str) {
        self.lines.lock().unwrap().push(("debug", message.to_string()));
    }
}

fn double_server(channel: &str) -> PipeServer {
    PipeServer::builder(channel)
        .method_fn("Double", |x: i64| Ok::<_, Infallible>(x * 2))
        .method_fn("Fail", |_: i64| Err::<i64, _>("boom".to_string()))
        .method("Echo", |s: String| async move { Ok::<_, Infallible>(s) })
        .build()
        .unwrap()
}

async fn call<R, P>(channel: &str, name: &str, parameter: P) -> Response<R>
where
    R: serde::de::DeserializeOwned,
    P: serde::Serialize,
{
    let cancel = CancellationToken::new();
    let mut client = PipeClient::new(channel);
    client.start(TIMEOUT, &cancel).await.unwrap();
    let response = client
        .send_message(&Request::new(name, parameter), &cancel)
        .await
        .unwrap();
    assert_eq!(client.state(), ClientState::Done);
    response
}

async fn wait_for_sessions(server: &PipeServer, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while server.session_count() != expected && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.session_count(), expected);
}

#[tokio::test]
async fn test_round_trip() {
    let channel = generate_channel_name();
    let server = double_server(&channel);
    server.start(&CancellationToken::new()).unwrap();

    let response: Response<i64> = call(&channel, "Double", 5).await;

    assert!(response.success);
    assert_eq!(response.error_message, "");
    assert_eq!(response.data, Some(10));
    server.stop();
}

#[tokio::test]
async fn test_sequential_clients_reuse_server() {
    let channel = generate_channel_name();
    let server = double_server(&channel);
    server.start(&CancellationToken::new()).unwrap();

    for i in 0..5i64 {
        let response: Response<i64> = call(&channel, "Double", i).await;
        assert_eq!(response.data, Some(i * 2));
    }

    wait_for_sessions(&server, 1).await;
    server.stop();
}

#[tokio::test]
async fn test_unknown_method() {
    let channel = generate_channel_name();
    let server = double_server(&channel);
    server.start(&CancellationToken::new()).unwrap();

    let response: Response<i64> = call(&channel, "Triple", 5).await;

    assert!(!response.success);
    assert_eq!(response.error_message, METHOD_NOT_FOUND_MESSAGE);
    assert!(response.data.is_none());
    server.stop();
}

#[tokio::test]
async fn test_handler_error() {
    let channel = generate_channel_name();
    let logger = Arc::new(RecordingLogger::default());
    let server = PipeServer::builder(&channel)
        .logger(logger.clone())
        .method_fn("Fail", |_: i64| Err::<i64, _>("boom".to_string()))
        .build()
        .unwrap();
    server.start(&CancellationToken::new()).unwrap();

    let response: Response<i64> = call(&channel, "Fail", 1).await;

    assert!(!response.success);
    assert_eq!(response.error_message, METHOD_FAILED_MESSAGE);
    assert!(logger.lines("error").iter().any(|l| l.contains("boom")));
    server.stop();
}

#[tokio::test]
async fn test_parameter_mismatch() {
    let channel = generate_channel_name();
    let server = double_server(&channel);
    server.start(&CancellationToken::new()).unwrap();

    let response: Response<i64> = call(&channel, "Double", "five").await;

    assert!(!response.success);
    assert!(response.error_message.contains("Double"));
    assert!(response.data.is_none());
    server.stop();
}

#[tokio::test]
async fn test_large_payload() {
    let channel = generate_channel_name();
    let server = double_server(&channel);
    server.start(&CancellationToken::new()).unwrap();

    let text = "x".repeat(256 * 1024);
    let response: Response<String> = call(&channel, "Echo", text.clone()).await;

    assert!(response.success);
    assert_eq!(response.data.as_deref(), Some(text.as_str()));
    server.stop();
}

#[tokio::test]
async fn test_more_clients_than_instances() {
    let channel = generate_channel_name();
    let server = PipeServer::builder(&channel)
        .max_instances(2)
        .method("Slow", |x: i64| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Infallible>(x + 1)
        })
        .build()
        .unwrap();
    server.start(&CancellationToken::new()).unwrap();

    let clients: Vec<_> = (0..3i64)
        .map(|i| {
            let channel = channel.clone();
            tokio::spawn(async move { call::<i64, _>(&channel, "Slow", i).await })
        })
        .collect();

    for (i, client) in clients.into_iter().enumerate() {
        let response = client.await.unwrap();
        assert!(response.success);
        assert_eq!(response.data, Some(i as i64 + 1));
    }

    wait_for_sessions(&server, 1).await;
    server.stop();
}

#[tokio::test]
async fn test_unreachable_server_times_out() {
    let mut client = PipeClient::new(&generate_channel_name());
    let started = Instant::now();

    let result = client
        .start(Duration::from_millis(300), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(PipeRpcError::ConnectTimeout(_))));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_send_before_start() {
    let mut client = PipeClient::new(&generate_channel_name());

    let result = client
        .send_message::<i64, _>(&Request::new("Double", 5), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(PipeRpcError::NotConnected)));
}

#[tokio::test]
async fn test_cancel_while_waiting_is_quiet() {
    let channel = generate_channel_name();
    let logger = Arc::new(RecordingLogger::default());
    let server = PipeServer::builder(&channel)
        .logger(logger.clone())
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    server.start(&cancel).unwrap();
    wait_for_sessions(&server, 1).await;

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!server.is_running());
    assert!(logger.lines("error").is_empty());
    assert!(!logger
        .lines("info")
        .iter()
        .any(|l| l.starts_with("Client ")));
}

#[tokio::test]
async fn test_start_and_stop_lifecycle() {
    let channel = generate_channel_name();
    let server = double_server(&channel);
    let cancel = CancellationToken::new();

    server.start(&cancel).unwrap();
    assert!(server.is_running());
    assert!(matches!(
        server.start(&cancel),
        Err(PipeRpcError::AlreadyStarted)
    ));

    server.stop();
    server.stop();
    assert!(!server.is_running());
    assert_eq!(server.session_count(), 0);

    // The same server can be started again once the old endpoint is released.
    let deadline = Instant::now() + Duration::from_secs(2);
    while let Err(e) = server.start(&cancel) {
        assert!(Instant::now() < deadline, "restart failed: {e}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let response: Response<i64> = call(&channel, "Double", 21).await;
    assert_eq!(response.data, Some(42));
    server.stop();
}

#[tokio::test]
async fn test_duplicate_method_rejected() {
    let result = PipeServer::builder(generate_channel_name())
        .method_fn("Double", |x: i64| Ok::<_, Infallible>(x * 2))
        .method_fn("Double", |x: i64| Ok::<_, Infallible>(x))
        .build();

    assert!(matches!(result, Err(PipeRpcError::DuplicateMethod(name)) if name == "Double"));
}

#[tokio::test]
async fn test_unit_result_is_present() {
    let channel = generate_channel_name();
    let server = PipeServer::builder(&channel)
        .method_fn("Log", |_: String| Ok::<_, Infallible>(()))
        .build()
        .unwrap();
    server.start(&CancellationToken::new()).unwrap();

    let response: Response<()> = call(&channel, "Log", "hello").await;

    assert!(response.success);
    assert_eq!(response.data, Some(()));
    server.stop();
}

#[tokio::test]
async fn test_second_server_on_same_channel_is_rejected() {
    let channel = generate_channel_name();
    let cancel = CancellationToken::new();

    let first = PipeServer::builder(&channel)
        .method_fn("Who", |_: ()| Ok::<_, Infallible>("first"))
        .build()
        .unwrap();
    first.start(&cancel).unwrap();

    let second = PipeServer::builder(&channel)
        .method_fn("Who", |_: ()| Ok::<_, Infallible>("second"))
        .build()
        .unwrap();
    assert!(second.start(&cancel).is_err());
    assert!(!second.is_running());
    assert!(first.is_running());

    let response: Response<String> = call(&channel, "Who", ()).await;
    assert_eq!(response.data.as_deref(), Some("first"));
    first.stop();
}
