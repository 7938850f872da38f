use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::VisionConfig;
use crate::error::VisionError;
use crate::vision::dto::{
    self, ChatMessage, ChatRequest, ChatResponse, ContentPart, FoodAnalysisResult, ImageUrl,
};
use crate::vision::image_prep;
use crate::vision::retry::{self, classify_status, Attempt, RetryPolicy, StatusClass};

/// Fixed instruction sent with every photo. The response shape here is
/// what `dto::parse_analysis` expects.
const ANALYSIS_PROMPT: &str = r#"You are a nutrition analysis assistant. Look at this photo and identify every visible food item. For each item estimate the serving size and nutrition values. Also give an overall confidence score from 0 to 100 and suggest which meal this most likely is.

Respond with JSON only, no surrounding prose, in exactly this shape:
{
  "items": [
    {"name": "string", "serving_size": "string", "calories": 0,
     "protein": 0.0, "carbs": 0.0, "fat": 0.0,
     "fiber": null, "sugar": null, "sodium": null,
     "saturated_fat": null, "cholesterol": null}
  ],
  "confidence": 0,
  "suggested_meal_type": "breakfast|lunch|dinner|snack",
  "notes": null
}

calories is an integer; protein, carbs and fat are grams; sodium and cholesterol are milligrams. Use null for values you cannot estimate. If no food is visible return an empty items array."#;

/// One photo in, one typed nutrition estimate out.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze(
        &self,
        image: Bytes,
        cancel: CancellationToken,
    ) -> Result<FoodAnalysisResult, VisionError>;

    /// Number of analyses currently in flight. Advisory, for UI
    /// disabling only.
    fn in_flight(&self) -> usize {
        0
    }
}

/// The raw HTTP exchange, split out so tests can script responses.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Returns (status, body) on any HTTP response; `Err` is a
    /// network-level failure (timeout, connection reset).
    async fn send(&self, body: &ChatRequest, api_key: &str) -> Result<(u16, String), String>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, VisionError> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| VisionError::InvalidUrl(format!("{endpoint}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::NetworkError(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, body: &ChatRequest, api_key: &str) -> Result<(u16, String), String> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| e.to_string())?;
        Ok((status, text))
    }
}

/// Client for an OpenAI-style chat-completion vision endpoint.
pub struct OpenAiVisionClient {
    config: VisionConfig,
    policy: RetryPolicy,
    transport: Arc<dyn ChatTransport>,
    in_flight: AtomicUsize,
}

impl OpenAiVisionClient {
    pub fn new(config: VisionConfig, transport: Arc<dyn ChatTransport>) -> Self {
        let policy = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            ..RetryPolicy::default()
        };
        Self {
            config,
            policy,
            transport,
            in_flight: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn build_request(&self, data_url: String) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: ANALYSIS_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url,
                            detail: "high",
                        },
                    },
                ],
            }],
            max_tokens: self.config.max_tokens,
        }
    }

    async fn send_with_retry(
        &self,
        body: &ChatRequest,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, VisionError> {
        retry::with_backoff(&self.policy, cancel, "vision_analyze", |attempt| async move {
            debug!(model = %self.config.model, attempt, "sending vision request");
            match self.transport.send(body, api_key).await {
                Err(err) => Attempt::Retry(VisionError::NetworkError(err)),
                Ok((status, text)) => match classify_status(status) {
                    StatusClass::Success => Attempt::Done(text),
                    StatusClass::RetryableRateLimit => Attempt::Retry(VisionError::RateLimited),
                    StatusClass::RetryableServerError => {
                        Attempt::Retry(VisionError::ApiError(status))
                    }
                    StatusClass::AuthFailure => Attempt::Fail(VisionError::ApiKeyMissing),
                    StatusClass::Terminal(code) => Attempt::Fail(VisionError::ApiError(code)),
                },
            }
        })
        .await
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn analyze(
        &self,
        image: Bytes,
        cancel: CancellationToken,
    ) -> Result<FoodAnalysisResult, VisionError> {
        // Key check comes first: no key means no network call at all.
        let api_key = self
            .config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(VisionError::ApiKeyMissing)?;

        // Decode and resize off the async workers.
        let max_dimension = self.config.max_dimension;
        let prepared = tokio::task::spawn_blocking(move || image_prep::prepare(&image, max_dimension))
            .await
            .map_err(|e| VisionError::ImageProcessingFailed(format!("prepare task: {e}")))??;
        debug!(
            width = prepared.width,
            height = prepared.height,
            "image prepared for analysis"
        );

        let body = self.build_request(prepared.data_url());

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = self.send_with_retry(&body, &api_key, &cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let text = outcome?;

        let envelope: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| VisionError::ParsingFailed(format!("response envelope: {e}")))?;
        let content = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(VisionError::EmptyResponse)?;

        dto::parse_analysis(&content)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::dto::MealType;
    use image::{DynamicImage, RgbImage};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn test_config(api_key: Option<&str>) -> VisionConfig {
        VisionConfig {
            api_key: api_key.map(String::from),
            endpoint: "http://localhost/v1/chat/completions".into(),
            model: "gpt-4o".into(),
            max_tokens: 1500,
            max_dimension: 1024,
            timeout_secs: 60,
            max_attempts: 3,
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn tiny_photo() -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    fn envelope(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"content": content}}]
        })
        .to_string()
    }

    const GOOD_CONTENT: &str = r#"{
        "items": [{"name": "toast", "serving_size": "1 slice", "calories": 80,
                   "protein": 3.0, "carbs": 14.0, "fat": 1.0}],
        "confidence": 87,
        "suggested_meal_type": "breakfast"
    }"#;

    /// Replays a fixed script, then repeats the last entry forever.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(u16, String), String>>>,
        last: Result<(u16, String), String>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<(u16, String), String>>) -> Arc<Self> {
            let mut script: VecDeque<_> = script.into();
            let last = script
                .back()
                .cloned()
                .unwrap_or(Err("empty script".to_string()));
            script.pop_back();
            Arc::new(Self {
                script: Mutex::new(script),
                last,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn send(&self, _body: &ChatRequest, _key: &str) -> Result<(u16, String), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.last.clone())
        }
    }

    fn client_with(transport: Arc<ScriptedTransport>) -> OpenAiVisionClient {
        OpenAiVisionClient::new(test_config(Some("sk-test")), transport)
            .with_policy(quick_policy())
    }

    #[tokio::test]
    async fn happy_path_parses_result() {
        let transport = ScriptedTransport::new(vec![Ok((200, envelope(GOOD_CONTENT)))]);
        let client = client_with(transport.clone());
        let result = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.suggested_meal_type, MealType::Breakfast);
        assert!((result.confidence - 0.87).abs() < 1e-9);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_then_success_retries() {
        let transport = ScriptedTransport::new(vec![
            Ok((429, String::new())),
            Ok((429, String::new())),
            Ok((200, envelope(GOOD_CONTENT))),
        ]);
        let client = client_with(transport.clone());
        let result = client.analyze(tiny_photo(), CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn persistent_rate_limit_exhausts_budget() {
        let transport = ScriptedTransport::new(vec![Ok((429, String::new()))]);
        let client = client_with(transport.clone());
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::RateLimited));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn unauthorized_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![Ok((401, String::new()))]);
        let client = client_with(transport.clone());
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::ApiKeyMissing));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn server_errors_retry_then_surface_status() {
        let transport = ScriptedTransport::new(vec![Ok((503, String::new()))]);
        let client = client_with(transport.clone());
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::ApiError(503)));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn other_status_is_terminal_on_first_attempt() {
        let transport = ScriptedTransport::new(vec![Ok((404, String::new()))]);
        let client = client_with(transport.clone());
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::ApiError(404)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn network_failures_retry_then_surface() {
        let transport = ScriptedTransport::new(vec![Err("connection reset".to_string())]);
        let client = client_with(transport.clone());
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::NetworkError(_)));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn missing_api_key_short_circuits_before_transport() {
        let transport = ScriptedTransport::new(vec![Ok((200, envelope(GOOD_CONTENT)))]);
        let client = OpenAiVisionClient::new(test_config(None), transport.clone());
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::ApiKeyMissing));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn empty_choices_is_empty_response() {
        let transport =
            ScriptedTransport::new(vec![Ok((200, r#"{"choices": []}"#.to_string()))]);
        let client = client_with(transport);
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::EmptyResponse));
    }

    #[tokio::test]
    async fn fenced_content_parses() {
        let fenced = format!("```json\n{GOOD_CONTENT}\n```");
        let transport = ScriptedTransport::new(vec![Ok((200, envelope(&fenced)))]);
        let client = client_with(transport);
        let result = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.items[0].name, "toast");
    }

    #[tokio::test]
    async fn prose_content_is_a_parsing_failure_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok((
            200,
            envelope("Looks like a tasty sandwich!"),
        ))]);
        let client = client_with(transport.clone());
        let err = client
            .analyze(tiny_photo(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::ParsingFailed(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_token_cancels_before_any_call() {
        let transport = ScriptedTransport::new(vec![Ok((200, envelope(GOOD_CONTENT)))]);
        let client = client_with(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.analyze(tiny_photo(), cancel).await.unwrap_err();
        assert!(matches!(err, VisionError::Cancelled));
        assert_eq!(transport.calls(), 0);
    }
}
