use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ClassifyError;
use crate::models::{PredictionResult, SelectedFile};

/// Multipart field the inference server reads the image from.
pub const UPLOAD_FIELD: &str = "file";

const NO_RESPONSE_MESSAGE: &str = "Network/Connection Failed";

/// What came back from one HTTP attempt, body already read.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn status_text(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// One HTTP round trip to the inference endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_image(&self, endpoint: &str, file: &SelectedFile) -> Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    fn build_form(file: &SelectedFile) -> Result<Form, TransportError> {
        let part = Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.media_type)
            .map_err(|e| TransportError(format!("Failed to create image part: {}", e)))?;
        Ok(Form::new().part(UPLOAD_FIELD, part))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_image(&self, endpoint: &str, file: &SelectedFile) -> Result<RawResponse, TransportError> {
        // Forms are consumed by the request, so every attempt builds its own.
        let form = Self::build_form(file)?;
        let response = self
            .client
            .post(endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        // The status is in, so a broken body must not turn this into a retry.
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(status, error = %e, "could not read response body");
                String::new()
            }
        };
        Ok(RawResponse { status, body })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay after the 1-based `attempt`, or `None` when it was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.initial_delay.saturating_mul(2u32.saturating_pow(attempt - 1)))
    }
}

#[derive(Debug)]
pub struct RetryOutcome {
    pub attempts: u32,
    /// Latest response received on any attempt. An attempt that fails at the
    /// transport level does not erase an earlier response.
    pub response: Option<RawResponse>,
}

/// Posts the file, retrying on transport failures and on 429 only.
/// `on_attempt` is called with the 1-based attempt number before each request.
pub async fn post_with_retry(
    transport: &dyn Transport,
    endpoint: &str,
    file: &SelectedFile,
    policy: &RetryPolicy,
    mut on_attempt: impl FnMut(u32) + Send,
) -> RetryOutcome {
    let mut response = None;
    let mut attempts = 0;

    for attempt in 1..=policy.max_attempts.max(1) {
        attempts = attempt;
        on_attempt(attempt);
        match transport.post_image(endpoint, file).await {
            Ok(resp) if resp.status == StatusCode::TOO_MANY_REQUESTS.as_u16() => {
                warn!(attempt, "rate limited by inference server");
                response = Some(resp);
            }
            Ok(resp) => {
                debug!(attempt, status = resp.status, "received response");
                response = Some(resp);
                break;
            }
            Err(e) => {
                warn!(attempt, error = %e, "request failed");
            }
        }

        if let Some(delay) = policy.delay_after(attempt) {
            debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
            tokio::time::sleep(delay).await;
        }
    }

    info!(attempts, status = response.as_ref().map(|r| r.status), "request finished");
    RetryOutcome { attempts, response }
}

/// The `error` field of an error body, if it carries anything worth showing.
/// Empty strings, `null`, `false` and `0` count as absent.
fn error_field(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

/// Turns the final response (if any) into a prediction or a request error.
pub fn interpret_response(response: Option<RawResponse>) -> Result<PredictionResult, ClassifyError> {
    let Some(response) = response else {
        return Err(ClassifyError::Network(NO_RESPONSE_MESSAGE.to_string()));
    };

    if !response.is_success() {
        let message = match serde_json::from_str::<Value>(&response.body) {
            Ok(body) => error_field(&body)
                .unwrap_or_else(|| format!("Server responded with status: {}", response.status)),
            Err(_) => format!("Server error: {} {}", response.status, response.status_text())
                .trim_end()
                .to_string(),
        };
        return Err(ClassifyError::Server {
            status: Some(response.status),
            message,
        });
    }

    serde_json::from_str(&response.body).map_err(|e| ClassifyError::Server {
        status: Some(response.status),
        message: format!("invalid prediction payload ({})", e),
    })
}


#[cfg(test)]
mod tests {
    use super::fake::ScriptedTransport;
    use super::*;
    use tokio::time::Instant;

    const OK_BODY: &str =
        r#"{"predicted_emotion":"happy","confidence":88.0,"full_probabilities":{"happy":88.0,"sad":12.0}}"#;

    fn dog() -> SelectedFile {
        SelectedFile::new("dog.jpg", "image/jpeg", b"jpeg bytes".to_vec())
    }

    #[test]
    fn backoff_doubles_and_stops_at_last_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(2000)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_with_backoff() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawResponse::new(429, "")),
            Ok(RawResponse::new(429, "")),
            Ok(RawResponse::new(200, OK_BODY)),
        ]);
        let mut seen = Vec::new();
        let outcome = post_with_retry(&transport, "http://x", &dog(), &RetryPolicy::default(), |n| seen.push(n)).await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        let times = transport.call_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(1000));
        assert_eq!(times[2] - times[1], Duration::from_millis(2000));
        let prediction = interpret_response(outcome.response).unwrap();
        assert_eq!(prediction.predicted_emotion, "happy");
    }

    #[tokio::test(start_paused = true)]
    async fn other_statuses_are_final() {
        for status in [400, 404, 500, 503] {
            let transport = ScriptedTransport::new(vec![Ok(RawResponse::new(status, "{}"))]);
            let start = Instant::now();
            let outcome = post_with_retry(&transport, "http://x", &dog(), &RetryPolicy::default(), |_| {}).await;
            assert_eq!(outcome.attempts, 1);
            assert_eq!(outcome.response.unwrap().status, status);
            assert_eq!(Instant::now() - start, Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_exhaust_attempts() {
        let transport = ScriptedTransport::new(vec![
            Err("connection refused".into()),
            Err("connection refused".into()),
            Err("connection refused".into()),
        ]);
        let start = Instant::now();
        let outcome = post_with_retry(&transport, "http://x", &dog(), &RetryPolicy::default(), |_| {}).await;
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.response.is_none());
        // 1000 + 2000, nothing after the last attempt
        assert_eq!(Instant::now() - start, Duration::from_millis(3000));
        assert_eq!(
            interpret_response(outcome.response),
            Err(ClassifyError::Network("Network/Connection Failed".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_rate_limit_survives_a_later_transport_failure() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawResponse::new(429, r#"{"error":"slow down"}"#)),
            Err("reset".into()),
            Err("reset".into()),
        ]);
        let outcome = post_with_retry(&transport, "http://x", &dog(), &RetryPolicy::default(), |_| {}).await;
        assert_eq!(outcome.attempts, 3);
        let err = interpret_response(outcome.response).unwrap_err();
        assert_eq!(
            err,
            ClassifyError::Server {
                status: Some(429),
                message: "slow down".into()
            }
        );
    }

    #[test]
    fn error_messages_fall_back_in_order() {
        let from_body = interpret_response(Some(RawResponse::new(400, r#"{"error":"No file uploaded"}"#)));
        assert!(matches!(from_body, Err(ClassifyError::Server { message, .. }) if message == "No file uploaded"));

        let no_field = interpret_response(Some(RawResponse::new(500, r#"{"detail":"boom"}"#)));
        assert!(
            matches!(no_field, Err(ClassifyError::Server { message, .. }) if message == "Server responded with status: 500")
        );

        let not_json = interpret_response(Some(RawResponse::new(502, "<html>bad gateway</html>")));
        assert!(
            matches!(not_json, Err(ClassifyError::Server { message, .. }) if message == "Server error: 502 Bad Gateway")
        );
    }

    #[test]
    fn error_field_of_any_json_type_is_shown() {
        let number = interpret_response(Some(RawResponse::new(500, r#"{"error":42}"#)));
        assert!(matches!(number, Err(ClassifyError::Server { message, .. }) if message == "42"));

        for body in ["[]", r#"{"error":""}"#, r#"{"error":null}"#, r#"{"error":0}"#, "\"oops\""] {
            let result = interpret_response(Some(RawResponse::new(500, body)));
            assert!(
                matches!(&result, Err(ClassifyError::Server { message, .. }) if message == "Server responded with status: 500"),
                "body {body}: {result:?}"
            );
        }
    }

    #[test]
    fn malformed_success_body_is_a_server_error() {
        let result = interpret_response(Some(RawResponse::new(200, r#"{"label":"happy"}"#)));
        assert!(matches!(result, Err(ClassifyError::Server { status: Some(200), .. })));
    }

    mod http {
        use super::*;
        use axum::{Json, Router, extract::Multipart, http::StatusCode as AxumStatus, routing::post};
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        async fn predict(mut multipart: Multipart) -> (AxumStatus, Json<serde_json::Value>) {
            while let Ok(Some(field)) = multipart.next_field().await {
                if field.name() == Some(UPLOAD_FIELD) {
                    let name = field.file_name().unwrap_or_default().to_string();
                    let content_type = field.content_type().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.unwrap_or_default();
                    return (
                        AxumStatus::OK,
                        Json(serde_json::json!({
                            "predicted_emotion": format!("{}|{}|{}", name, content_type, bytes.len()),
                            "confidence": 50.0,
                            "full_probabilities": {"happy": 50.0, "sad": 50.0}
                        })),
                    );
                }
            }
            (AxumStatus::BAD_REQUEST, Json(serde_json::json!({"error": "No file uploaded"})))
        }

        #[tokio::test]
        async fn uploads_the_file_as_a_multipart_part() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = Router::new().route("/predict", post(predict));
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let transport = ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap();
            let endpoint = format!("http://{}/predict", addr);
            let response = transport.post_image(&endpoint, &dog()).await.unwrap();
            assert_eq!(response.status, 200);
            let prediction = interpret_response(Some(response)).unwrap();
            assert_eq!(prediction.predicted_emotion, "dog.jpg|image/jpeg|10");
        }

        /// Answers every connection with a 500 whose body stops short of its
        /// declared length, and counts the connections.
        async fn truncated_500_server() -> (String, Arc<AtomicUsize>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = hits.clone();
            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    read_request(&mut socket).await;
                    let head = "HTTP/1.1 500 Internal Server Error\r\n\
                        Content-Type: application/json\r\n\
                        Content-Length: 100\r\n\r\n";
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(br#"{"error":"#).await;
                    let _ = socket.shutdown().await;
                }
            });
            (format!("http://{}/predict", addr), hits)
        }

        async fn read_request(socket: &mut TcpStream) {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let Ok(n) = socket.read(&mut chunk).await else { return };
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);
                let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else { continue };
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }

        #[tokio::test]
        async fn received_status_is_final_even_if_the_body_breaks() {
            let (endpoint, hits) = truncated_500_server().await;
            let transport = ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap();
            let policy = RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(10),
            };

            let outcome = post_with_retry(&transport, &endpoint, &dog(), &policy, |_| {}).await;
            assert_eq!(outcome.attempts, 1);
            assert_eq!(hits.load(Ordering::SeqCst), 1);
            assert_eq!(
                interpret_response(outcome.response),
                Err(ClassifyError::Server {
                    status: Some(500),
                    message: "Server error: 500 Internal Server Error".into()
                })
            );
        }

        #[tokio::test]
        async fn unreachable_server_is_a_transport_error() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let transport = ReqwestTransport::new(None).unwrap();
            let result = transport.post_image(&format!("http://{}/predict", addr), &dog()).await;
            assert!(result.is_err());
        }
    }
}
