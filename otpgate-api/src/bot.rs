/// HTTP client for the messaging bot service
///
/// The bot owns the WhatsApp/SMS connections. This server only asks it to
/// deliver a one-time code or a free-form message; both calls carry the
/// shared secret in `X-Internal-Secret`, the same header the bot uses when it
/// calls back into `/api/auth/whatsapp-verify`.
///
/// # Example
///
/// ```no_run
/// use otpgate_api::bot::BotClient;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), otpgate_api::bot::BotError> {
/// let bot = BotClient::new("http://localhost:3001", "secret", Duration::from_secs(10))?;
/// bot.send_otp("+15551234567", "123456").await?;
/// # Ok(())
/// # }
/// ```

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the shared secret in both directions
pub const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

/// Bot call failure
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Connection, timeout or client construction failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Bot answered with a non-2xx status
    #[error("bot returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct SendOtpBody<'a> {
    phone: &'a str,
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    phone: &'a str,
    message: &'a str,
}

/// Bot service client
#[derive(Debug, Clone)]
pub struct BotClient {
    client: Client,
    base_url: String,
    shared_secret: String,
}

impl BotClient {
    pub fn new(
        base_url: impl Into<String>,
        shared_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BotError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shared_secret: shared_secret.into(),
        })
    }

    /// Delivers a one-time code; failures are surfaced to the caller
    pub async fn send_otp(&self, phone: &str, code: &str) -> Result<(), BotError> {
        self.post("/send-otp", &SendOtpBody { phone, code }).await
    }

    /// Sends a free-form message
    pub async fn send_message(&self, phone: &str, message: &str) -> Result<(), BotError> {
        self.post("/send-message", &SendMessageBody { phone, message })
            .await
    }

    /// Sends a message, logging instead of failing
    pub async fn notify(&self, phone: &str, message: &str) {
        if let Err(e) = self.send_message(phone, message).await {
            warn!(phone = %phone, error = %e, "Bot notification failed");
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), BotError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header(INTERNAL_SECRET_HEADER, &self.shared_secret)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(path = path, "Bot call succeeded");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(BotError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Json, http::HeaderMap, http::StatusCode, routing::post, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

    async fn spawn_bot(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));

        let record = |path: &'static str, seen: Seen| {
            move |headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    let secret = headers
                        .get(INTERNAL_SECRET_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push((path.to_string(), secret, body));
                    (status, "bot says hi")
                }
            }
        };

        let app = Router::new()
            .route("/send-otp", post(record("/send-otp", seen.clone())))
            .route("/send-message", post(record("/send-message", seen.clone())));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/", addr), seen)
    }

    #[tokio::test]
    async fn test_send_otp_posts_code_with_secret() {
        let (url, seen) = spawn_bot(StatusCode::OK).await;
        let bot = BotClient::new(url, "s3cret", Duration::from_secs(5)).unwrap();

        bot.send_otp("+15551234567", "042137").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/send-otp");
        assert_eq!(seen[0].1.as_deref(), Some("s3cret"));
        assert_eq!(seen[0].2["phone"], "+15551234567");
        assert_eq!(seen[0].2["code"], "042137");
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (url, _) = spawn_bot(StatusCode::BAD_GATEWAY).await;
        let bot = BotClient::new(url, "s3cret", Duration::from_secs(5)).unwrap();

        let err = bot.send_message("+15551234567", "hello").await.unwrap_err();
        match err {
            BotError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bot says hi");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notify_swallows_failures() {
        let bot = BotClient::new("http://127.0.0.1:9", "s3cret", Duration::from_millis(200)).unwrap();
        bot.notify("+15551234567", "hello").await;
    }
}
