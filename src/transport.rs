use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub bytes: u64,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("cancelled before completion")]
    Cancelled,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = reqwest::Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let mut builder = self.client.get(url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        Ok(FetchResponse {
            status,
            bytes: body.len() as u64,
        })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        FetchError::Connect(err.to_string())
    } else {
        FetchError::Http(err.to_string())
    }
}

/// Race the call against `cancel` and an outer timeout so a transport that
/// ignores its own timeout still cannot hold the cycle.
pub async fn fetch_with_deadline<T: Transport + ?Sized>(
    transport: &T,
    request: &FetchRequest,
    cancel: &CancellationToken,
) -> Result<FetchResponse, FetchError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        res = tokio::time::timeout(request.timeout, transport.fetch(request)) => {
            match res {
                Ok(inner) => inner,
                Err(_) => Err(FetchError::Timeout),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeTransport, Scripted};
    use super::*;

    fn request(timeout: Duration) -> FetchRequest {
        FetchRequest {
            url: "https://example.invalid/".to_string(),
            headers: Vec::new(),
            timeout,
        }
    }

    #[test]
    fn only_2xx_is_success() {
        assert!(FetchResponse { status: 200, bytes: 0 }.is_success());
        assert!(FetchResponse { status: 204, bytes: 0 }.is_success());
        assert!(!FetchResponse { status: 301, bytes: 0 }.is_success());
        assert!(!FetchResponse { status: 503, bytes: 0 }.is_success());
    }

    #[tokio::test]
    async fn cancellation_wins_over_hanging_call() {
        let transport = FakeTransport::with_script(vec![Scripted::Hang]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = fetch_with_deadline(&transport, &request(Duration::from_secs(60)), &cancel).await;
        assert!(matches!(res, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn outer_timeout_bounds_the_call() {
        let transport = FakeTransport::with_script(vec![Scripted::Hang]);
        let cancel = CancellationToken::new();
        let res = fetch_with_deadline(&transport, &request(Duration::from_millis(20)), &cancel).await;
        assert!(matches!(res, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn passes_through_response() {
        let transport = FakeTransport::with_script(vec![Scripted::Status(404, 12)]);
        let cancel = CancellationToken::new();
        let res = fetch_with_deadline(&transport, &request(Duration::from_secs(5)), &cancel)
            .await
            .expect("response");
        assert_eq!(res, FetchResponse { status: 404, bytes: 12 });
        assert_eq!(transport.call_count(), 1);
    }
}
