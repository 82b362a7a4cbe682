//! End-to-end drain behavior against a real socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use graceful_http::net::ListenerError;
use graceful_http::OnTimeout;
use tokio::net::TcpStream;

mod common;

fn recording_timeout() -> (OnTimeout, Arc<Mutex<Vec<Instant>>>) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let on_timeout: OnTimeout = {
        let fired = Arc::clone(&fired);
        Arc::new(move || fired.lock().unwrap().push(Instant::now()))
    };
    (on_timeout, fired)
}

#[tokio::test]
async fn in_flight_request_finishes_within_budget() {
    let (on_timeout, fired) = recording_timeout();
    let running = common::start_server(Duration::from_secs(5), None, Some(on_timeout)).await;

    let client = common::client();
    let url = format!("http://{}/sleep/2000", running.addr);
    let request = tokio::spawn(async move { client.get(url).send().await });

    common::wait_for_in_flight(&running.server, 1).await;

    let started = Instant::now();
    running.server.shutdown().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(1500), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "took too long: {:?}", elapsed);
    assert!(fired.lock().unwrap().is_empty());

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");
    assert_eq!(running.server.drain_state().pending(), 0);
}

#[tokio::test]
async fn deadline_fires_on_timeout_while_handler_runs() {
    let (on_timeout, fired) = recording_timeout();
    let running = common::start_server(Duration::from_secs(1), None, Some(on_timeout)).await;

    let client = common::client();
    let url = format!("http://{}/sleep/2000", running.addr);
    let request = tokio::spawn(async move { client.get(url).send().await });
    common::wait_for_in_flight(&running.server, 1).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), running.server.shutdown())
        .await
        .expect("shutdown must not hang")
        .unwrap();

    let fired = fired.lock().unwrap().clone();
    assert_eq!(fired.len(), 1);
    let fired_after = fired[0] - started;
    assert!(fired_after >= Duration::from_millis(900), "fired early: {:?}", fired_after);
    assert!(fired_after < Duration::from_millis(1700), "fired late: {:?}", fired_after);

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn closed_listener_refuses_and_open_connection_gets_unavailable() {
    let running = common::start_server(Duration::from_secs(2), None, None).await;

    let mut conn = TcpStream::connect(running.addr).await.unwrap();
    assert_eq!(common::raw_get(&mut conn, "/hello").await, "HTTP/1.1 200 OK");

    running.server.shutdown().await.unwrap();
    running.serving.await.unwrap().unwrap();

    assert!(TcpStream::connect(running.addr).await.is_err());

    assert_eq!(
        common::raw_get(&mut conn, "/hello").await,
        "HTTP/1.1 503 Service Unavailable"
    );
    assert_eq!(running.server.drain_state().pending(), 0);
}

#[tokio::test]
async fn panicking_handler_does_not_take_server_down() {
    let running = common::start_server(Duration::from_secs(2), None, None).await;
    let client = common::client();

    let response = client
        .get(format!("http://{}/panic", running.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(running.server.drain_state().pending(), 1);

    let response = client
        .get(format!("http://{}/hello", running.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello");

    running.server.shutdown().await.unwrap();
    assert_eq!(running.server.drain_state().pending(), 0);
}

#[tokio::test]
async fn concurrent_requests_all_counted_before_shutdown_returns() {
    let running = common::start_server(Duration::from_secs(5), None, None).await;
    let completed = Arc::new(AtomicUsize::new(0));
    let client = common::client();

    let requests: Vec<_> = (0..8)
        .map(|_| {
            let url = format!("http://{}/sleep/500", running.addr);
            let completed = Arc::clone(&completed);
            let client = client.clone();
            tokio::spawn(async move {
                let response = client.get(url).send().await.unwrap();
                assert_eq!(response.status(), 200);
                completed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    common::wait_for_in_flight(&running.server, 8).await;

    running.server.shutdown().await.unwrap();
    assert_eq!(running.server.drain_state().pending(), 0);

    for request in requests {
        request.await.unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn streaming_body_keeps_request_in_flight() {
    let running = common::start_server(Duration::from_secs(5), None, None).await;

    let response = common::client()
        .get(format!("http://{}/stream", running.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(running.server.drain_state().in_flight(), 1);

    let body = tokio::spawn(async move { response.text().await });

    let started = Instant::now();
    running.server.shutdown().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(400), "returned mid-body: {:?}", elapsed);
    assert_eq!(running.server.drain_state().pending(), 0);

    let expected: String = (0..common::STREAM_CHUNKS)
        .map(|i| format!("chunk{}\n", i))
        .collect();
    assert_eq!(body.await.unwrap().unwrap(), expected);
}

#[tokio::test]
async fn second_shutdown_reports_closed() {
    let running = common::start_server(Duration::from_secs(1), None, None).await;
    running.server.shutdown().await.unwrap();
    assert!(matches!(
        running.server.shutdown().await,
        Err(ListenerError::Closed)
    ));
}
