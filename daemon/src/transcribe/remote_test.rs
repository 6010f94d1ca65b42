use super::*;
use crate::transcribe::ProgressEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn response(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{extra_headers}\r\n{body}",
        body.len()
    )
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read one HTTP request, headers and body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = find(&buf, b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok());
        match content_length {
            Some(len) if buf.len() - end - 4 >= len => break,
            Some(_) => {}
            None if head.contains("transfer-encoding: chunked") => {
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
            }
            None => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

struct FakeApi {
    base_url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

/// Serve the canned responses in order, one connection each.
async fn fake_api(responses: Vec<String>) -> FakeApi {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let counter = Arc::clone(&hits);
    let seen = Arc::clone(&requests);
    tokio::spawn(async move {
        for canned in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            seen.lock().unwrap().push(request);
            counter.fetch_add(1, Ordering::SeqCst);
            socket.write_all(canned.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    });

    FakeApi {
        base_url: format!("http://{addr}/v1"),
        hits,
        requests,
    }
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base: Duration::from_millis(1),
        rate_limit_ceiling: Duration::from_millis(5),
        transient_ceiling: Duration::from_millis(5),
    }
}

fn transcriber(api: &FakeApi, max_retries: u32) -> RemoteTranscriber {
    let config = RemoteConfig {
        base_url: api.base_url.clone(),
        timeout_secs: 10,
        ..RemoteConfig::default()
    };
    RemoteTranscriber::new(&config, "sk-test".into(), fast_policy(max_retries)).unwrap()
}

fn request(language: Option<&str>) -> TranscriptionRequest {
    TranscriptionRequest {
        language: language.map(str::to_string),
        ..TranscriptionRequest::from_config(&crate::config::Config::default())
    }
}

fn audio_file() -> (TempDir, std::path::PathBuf) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("clip.wav");
    std::fs::write(&path, b"RIFF....WAVEfmt ").unwrap();
    (temp, path)
}

fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_classify_status() {
    let hint = Some(Duration::from_secs(7));
    assert_eq!(
        classify_status(StatusCode::TOO_MANY_REQUESTS, hint, "slow down".into()),
        RemoteError::RateLimited {
            retry_after: hint,
            message: "slow down".into()
        }
    );
    assert_eq!(
        classify_status(StatusCode::REQUEST_TIMEOUT, None, "late".into()),
        RemoteError::Timeout("late".into())
    );
    for code in [500, 502, 503, 504] {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(
            classify_status(status, None, "down".into()).class(),
            FailureClass::Transient
        );
    }
    for code in [400, 401, 403, 404, 413, 501] {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(
            classify_status(status, None, "nope".into()).class(),
            FailureClass::Fatal,
            "HTTP {code} must not be retried"
        );
    }
}

#[test]
fn test_retry_hint_only_for_rate_limits() {
    let limited = RemoteError::RateLimited {
        retry_after: Some(Duration::from_secs(3)),
        message: String::new(),
    };
    assert_eq!(limited.retry_hint(), Some(Duration::from_secs(3)));
    assert_eq!(RemoteError::Timeout("t".into()).retry_hint(), None);
}

#[test]
fn test_parse_retry_after() {
    assert_eq!(parse_retry_after("20"), Some(Duration::from_secs(20)));
    assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
    assert_eq!(parse_retry_after("-1"), None);
    assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    assert_eq!(parse_retry_after("inf"), None);
}

#[test]
fn test_huge_retry_after_saturates_and_is_capped() {
    let hint = parse_retry_after("99999999999999999999");
    assert_eq!(hint, Some(Duration::MAX));

    let policy = RetryPolicy::default();
    let wait = retry::backoff_delay(&policy, FailureClass::RateLimited, 1, hint);
    assert_eq!(wait, policy.rate_limit_ceiling);
}

#[tokio::test]
async fn test_huge_retry_after_still_retries() {
    let api = fake_api(vec![
        response(
            "429 Too Many Requests",
            "retry-after: 99999999999999999999\r\n",
            r#"{"error":{"message":"slow down"}}"#,
        ),
        response("200 OK", "", r#"{"text":"hello","language":"english"}"#),
    ])
    .await;
    let (_temp, path) = audio_file();
    let (sink, rx) = ProgressSink::channel();

    let result = transcriber(&api, 3)
        .transcribe(&path, &request(None), &sink)
        .await
        .unwrap();

    assert_eq!(result.text, "hello");
    assert_eq!(api.hits.load(Ordering::SeqCst), 2);
    let retries = drain(rx)
        .into_iter()
        .filter(|event| matches!(event, ProgressEvent::Retry(_)))
        .count();
    assert_eq!(retries, 1);
}

#[test]
fn test_error_message_extraction() {
    let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
    assert_eq!(error_message(body), "You exceeded your current quota");
    assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    assert_eq!(error_message(""), "no response body");
}

#[test]
fn test_verbose_json_prefers_segments() {
    let payload: VerboseTranscription = serde_json::from_str(
        r#"{"text":"ignored","language":"turkish","segments":[{"text":" Merhaba "},{"text":""},{"text":"dünya"}]}"#,
    )
    .unwrap();

    let result = payload.into_result();

    assert_eq!(result.text, "Merhaba\ndünya");
    assert_eq!(result.language.as_deref(), Some("turkish"));
    assert_eq!(result.language_probability, None);
}

#[test]
fn test_verbose_json_without_segments_uses_text_lines() {
    let payload: VerboseTranscription =
        serde_json::from_str(r#"{"text":" first line \n\nsecond line "}"#).unwrap();

    let result = payload.into_result();

    assert_eq!(result.text, "first line\nsecond line");
    assert_eq!(result.language, None);
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let api = fake_api(vec![
        response(
            "429 Too Many Requests",
            "retry-after: 0\r\n",
            r#"{"error":{"message":"Rate limit reached"}}"#,
        ),
        response(
            "200 OK",
            "",
            r#"{"text":"selam","language":"turkish","segments":[{"text":"selam"}]}"#,
        ),
    ])
    .await;
    let (_temp, path) = audio_file();
    let (sink, rx) = ProgressSink::channel();

    let result = transcriber(&api, 5)
        .transcribe(&path, &request(Some("tr")), &sink)
        .await
        .unwrap();

    assert_eq!(result.text, "selam");
    assert_eq!(api.hits.load(Ordering::SeqCst), 2);

    let retries: Vec<_> = drain(rx)
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::Retry(notice) => Some(notice),
            ProgressEvent::Stage(_) => None,
        })
        .collect();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].attempt, 1);
    assert_eq!(retries[0].class, FailureClass::RateLimited);
    assert_eq!(retries[0].wait, Duration::ZERO);

    let requests = api.requests.lock().unwrap();
    let first = &requests[0];
    assert!(first.starts_with("POST /v1/audio/transcriptions"));
    assert!(first.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    assert!(first.contains("verbose_json"));
    assert!(first.contains("name=\"language\""));
    assert!(first.contains("whisper-1"));
}

#[tokio::test]
async fn test_auto_language_omits_language_field() {
    let api = fake_api(vec![response("200 OK", "", r#"{"text":"hi"}"#)]).await;
    let (_temp, path) = audio_file();

    transcriber(&api, 5)
        .transcribe(&path, &request(None), &ProgressSink::discard())
        .await
        .unwrap();

    assert!(!api.requests.lock().unwrap()[0].contains("name=\"language\""));
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let api = fake_api(vec![
        response("503 Service Unavailable", "", "overloaded"),
        response("503 Service Unavailable", "", "overloaded"),
        response("503 Service Unavailable", "", "overloaded"),
    ])
    .await;
    let (_temp, path) = audio_file();
    let (sink, rx) = ProgressSink::channel();

    let err = transcriber(&api, 3)
        .transcribe(&path, &request(None), &sink)
        .await
        .unwrap_err();

    assert!(err.is_retries_exhausted());
    assert!(matches!(
        err,
        TranscribeError::Remote(RemoteError::Server { status: 503, .. })
    ));
    assert_eq!(api.hits.load(Ordering::SeqCst), 3);
    let retries = drain(rx)
        .into_iter()
        .filter(|event| matches!(event, ProgressEvent::Retry(_)))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let api = fake_api(vec![response(
        "401 Unauthorized",
        "",
        r#"{"error":{"message":"Incorrect API key provided"}}"#,
    )])
    .await;
    let (_temp, path) = audio_file();

    let err = transcriber(&api, 5)
        .transcribe(&path, &request(None), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(!err.is_retries_exhausted());
    assert!(err.to_string().contains("Incorrect API key"));
    assert_eq!(api.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = RemoteConfig {
        base_url: format!("http://{addr}/v1"),
        ..RemoteConfig::default()
    };
    let remote = RemoteTranscriber::new(&config, "sk-test".into(), fast_policy(2)).unwrap();
    let (_temp, path) = audio_file();

    let err = remote
        .transcribe(&path, &request(None), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TranscribeError::Remote(RemoteError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_file_part_content_type_follows_extension() {
    let api = fake_api(vec![response("200 OK", "", r#"{"text":"ok"}"#)]).await;
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("scribe-upload.mp3");
    std::fs::write(&path, b"ID3\x03\x00\x00\x00").unwrap();
    let (sink, _rx) = ProgressSink::channel();

    transcriber(&api, 1)
        .transcribe(&path, &request(None), &sink)
        .await
        .unwrap();

    let requests = api.requests.lock().unwrap();
    let sent = requests[0].to_ascii_lowercase();
    let part = &sent[sent.find("filename=\"scribe-upload.mp3\"").unwrap()..];
    let part_head = &part[..part.find("\r\n\r\n").unwrap()];
    assert!(part_head.contains("content-type: audio/mpeg"), "{part_head}");
    assert!(!sent.contains("audio/wav"));
}
