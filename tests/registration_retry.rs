// tests/registration_retry.rs

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use interchange::errors::RegistrationError;
use interchange::registration::{
    Backoff, ControlService, HttpControlService, RegistrationClient, RetryPolicy,
    register_with_retry,
};
use interchange_test_utils::builders::memory_registration_info;
use interchange_test_utils::fake_control::FakeControlService;
use interchange_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn quick(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(Some(max_attempts), Backoff::Fixed(Duration::from_millis(1)))
}

#[tokio::test]
async fn retry_stops_at_first_success() -> TestResult {
    init_tracing();

    let calls = AtomicU32::new(0);
    let value = register_with_retry(
        || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n * 10)
                }
            }
        },
        &quick(5),
    )
    .await
    .map_err(|e| e.last)?;

    assert_eq!(value, 30);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn retry_reports_last_error_when_exhausted() -> TestResult {
    init_tracing();

    let calls = AtomicU32::new(0);
    let exhausted = register_with_retry(
        || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err::<(), _>(format!("attempt {n} failed")) }
        },
        &quick(3),
    )
    .await
    .unwrap_err();

    assert_eq!(exhausted.attempts, 3);
    assert_eq!(exhausted.last, "attempt 3 failed");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn single_attempt_policy_never_retries() -> TestResult {
    init_tracing();

    let calls = AtomicU32::new(0);
    let result = register_with_retry(
        || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("down") }
        },
        &RetryPolicy::single_attempt(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn exponential_backoff_doubles_up_to_the_cap() {
    let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_millis(700));
    let delays: Vec<_> = (1..=5).map(|n| backoff.delay_for(n)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(700),
            Duration::from_millis(700),
        ]
    );
    assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(700));

    let fixed = Backoff::Fixed(Duration::from_millis(42));
    assert_eq!(fixed.delay_for(1), fixed.delay_for(9));
}

#[tokio::test]
async fn client_retries_the_same_endpoint_id() -> TestResult {
    init_tracing();

    let info = memory_registration_info("ep-client");
    let control = FakeControlService::new(info.clone()).failing_first(2);
    let client = RegistrationClient::new(Arc::new(control.clone()), quick(3));

    let got = with_timeout(client.register("ep-client")).await?;
    assert_eq!(got, info);
    assert_eq!(control.calls(), 3);
    assert_eq!(control.endpoints(), vec!["ep-client".to_string(); 3]);
    Ok(())
}

#[tokio::test]
async fn client_wraps_the_last_failure() -> TestResult {
    init_tracing();

    let control = FakeControlService::always_failing(memory_registration_info("ep-x"));
    let client = RegistrationClient::new(Arc::new(control.clone()), quick(2));

    let err = with_timeout(client.register("ep-x")).await.unwrap_err();
    match err {
        RegistrationError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, RegistrationError::Rejected { status: 503, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn disabled_client_cannot_register() -> TestResult {
    let client = RegistrationClient::disabled();
    assert!(!client.can_register());
    assert!(matches!(
        client.register("ep").await,
        Err(RegistrationError::NotConfigured)
    ));
    Ok(())
}

/// Read one HTTP/1.1 request (headers plus `Content-Length` body).
async fn read_request(stream: &mut TcpStream) -> std::io::Result<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).into_owned();
    Ok((head, body))
}

/// Serve exactly one request with `status` and `body`; the request is sent
/// back through the returned receiver.
async fn serve_once(
    status: &'static str,
    body: String,
) -> Result<(String, oneshot::Receiver<(String, String)>), Box<dyn Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else { return };
        let Ok(request) = read_request(&mut stream).await else { return };
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
        let _ = tx.send(request);
    });

    Ok((url, rx))
}

#[tokio::test]
async fn http_control_service_posts_endpoint_and_parses_descriptors() -> TestResult {
    init_tracing();

    let info = memory_registration_info("ep-http");
    let (url, request) = serve_once("200 OK", serde_json::to_string(&info)?).await?;

    let service = HttpControlService::new(
        format!("{url}/"),
        Some("s3cret".to_string()),
        Some("lab".to_string()),
    )?;
    let got = with_timeout(service.register_endpoint("ep-http")).await?;
    assert_eq!(got, info);

    let (head, body) = request.await?;
    assert!(head.starts_with("POST /endpoints "), "{head}");
    assert!(head.to_lowercase().contains("authorization: bearer s3cret"));
    let sent: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(sent["endpoint_id"], "ep-http");
    assert_eq!(sent["endpoint_name"], "lab");

    Ok(())
}

#[tokio::test]
async fn http_control_service_surfaces_rejections() -> TestResult {
    init_tracing();

    let (url, _request) =
        serve_once("403 Forbidden", "{\"reason\":\"unknown endpoint\"}".to_string()).await?;
    let service = HttpControlService::new(url, None, None)?;

    let err = with_timeout(service.register_endpoint("ep-denied"))
        .await
        .unwrap_err();
    match err {
        RegistrationError::Rejected { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("unknown endpoint"));
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn http_control_service_rejects_malformed_descriptors() -> TestResult {
    init_tracing();

    let (url, _request) = serve_once("200 OK", "{\"task_queue_info\":{}}".to_string()).await?;
    let service = HttpControlService::new(url, None, None)?;

    let err = with_timeout(service.register_endpoint("ep-bad"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::InvalidResponse(_)), "{err}");
    Ok(())
}
