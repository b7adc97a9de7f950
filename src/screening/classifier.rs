//! HTTP adapter for the remote eye-image classifier.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use super::traits::Classifier;
use crate::models::record::base64_bytes;
use crate::models::{AnalysisResult, Attachment};

/// Remote classifier reached over JSON/HTTP.
pub struct HttpClassifier {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpClassifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[derive(Serialize)]
struct ClassifyImage<'a> {
    mime_type: &'a str,
    #[serde(with = "base64_bytes")]
    data: &'a [u8],
}

/// Request body for POST /classify
#[derive(Serialize)]
struct ClassifyRequest<'a> {
    right_eye: ClassifyImage<'a>,
    left_eye: ClassifyImage<'a>,
}

/// Response body from POST /classify
#[derive(Deserialize)]
struct ClassifyResponse {
    label: String,
    confidence: f32,
}

impl Classifier for HttpClassifier {
    fn classify(
        &self,
        right_eye: Attachment,
        left_eye: Attachment,
    ) -> BoxFuture<'_, Result<AnalysisResult, ClassifierError>> {
        Box::pin(async move {
            let url = format!("{}/classify", self.base_url);
            let body = ClassifyRequest {
                right_eye: ClassifyImage {
                    mime_type: &right_eye.mime_type,
                    data: &right_eye.data,
                },
                left_eye: ClassifyImage {
                    mime_type: &left_eye.mime_type,
                    data: &left_eye.data,
                },
            };

            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        ClassifierError::Timeout(self.timeout_secs)
                    } else if e.is_connect() {
                        ClassifierError::Connection(self.base_url.clone())
                    } else {
                        ClassifierError::HttpClient(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClassifierError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let parsed: ClassifyResponse = response
                .json()
                .await
                .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

            validate_result(AnalysisResult {
                label: parsed.label,
                confidence: parsed.confidence,
            })
        })
    }
}

/// Label must be non-empty and confidence a percentage.
pub fn validate_result(result: AnalysisResult) -> Result<AnalysisResult, ClassifierError> {
    if result.label.trim().is_empty() {
        return Err(ClassifierError::InvalidResponse("empty label".into()));
    }
    if !(0.0..=100.0).contains(&result.confidence) {
        return Err(ClassifierError::InvalidResponse(format!(
            "confidence {} outside 0-100",
            result.confidence
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use crate::models::Eye;

    fn attachment(eye: Eye) -> Attachment {
        Attachment {
            eye,
            mime_type: "image/png".into(),
            width: 1,
            height: 1,
            content_hash: "h".into(),
            perceptual_hash: None,
            data: vec![1, 2, 3],
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let bad = AnalysisResult { label: "Cataract".into(), confidence: 120.0 };
        assert!(validate_result(bad).is_err());
        let empty = AnalysisResult { label: " ".into(), confidence: 50.0 };
        assert!(validate_result(empty).is_err());
        let ok = AnalysisResult { label: "Normal".into(), confidence: 0.0 };
        assert!(validate_result(ok).is_ok());
    }

    #[tokio::test]
    async fn classify_posts_both_images() {
        let router = Router::new().route(
            "/classify",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["right_eye"]["data"], "AQID");
                assert_eq!(body["left_eye"]["mime_type"], "image/png");
                Json(serde_json::json!({"label": "Possible cataract", "confidence": 87}))
            }),
        );
        let base = serve(router).await;

        let classifier = HttpClassifier::new(&base, Duration::from_secs(5)).unwrap();
        let result = classifier
            .classify(attachment(Eye::Right), attachment(Eye::Left))
            .await
            .unwrap();
        assert_eq!(result.label, "Possible cataract");
        assert_eq!(result.confidence, 87.0);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let router = Router::new().route(
            "/classify",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let base = serve(router).await;

        let classifier = HttpClassifier::new(&base, Duration::from_secs(5)).unwrap();
        let err = classifier
            .classify(attachment(Eye::Right), attachment(Eye::Left))
            .await
            .unwrap_err();
        assert_eq!(err, ClassifierError::Status { status: 503, body: "busy".into() });
    }

    #[tokio::test]
    async fn unreachable_server_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let classifier = HttpClassifier::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let result = classifier
            .classify(attachment(Eye::Right), attachment(Eye::Left))
            .await;
        assert!(result.is_err());
    }
}
