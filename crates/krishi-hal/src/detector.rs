//! The inference capability, consumed as "image in, detections out".

use std::time::Duration;

use async_trait::async_trait;
use krishi_types::{Detection, KrishiError};
use serde::Deserialize;
use tracing::debug;

use crate::camera::CameraFrame;

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &CameraFrame) -> Result<Vec<Detection>, KrishiError>;
}

/// Posts each frame as a JPEG to an inference service and reads back
/// `[{"class_name": .., "confidence": ..}]` (optionally wrapped in
/// `{"detections": [..]}`).
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
    jpeg_quality: u8,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectResponse {
    Wrapped { detections: Vec<Detection> },
    Bare(Vec<Detection>),
}

impl HttpDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KrishiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KrishiError::Inference(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            jpeg_quality: 90,
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &CameraFrame) -> Result<Vec<Detection>, KrishiError> {
        let body = frame.encode_jpeg(self.jpeg_quality)?;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .await
            .map_err(|e| KrishiError::Inference(format!("request to {} failed: {e}", self.url)))?
            .error_for_status()
            .map_err(|e| KrishiError::Inference(e.to_string()))?;
        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| KrishiError::Inference(format!("bad inference response: {e}")))?;
        let detections = match parsed {
            DetectResponse::Wrapped { detections } | DetectResponse::Bare(detections) => detections,
        };
        debug!(count = detections.len(), "inference complete");
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_wrapped_responses() {
        let bare: DetectResponse =
            serde_json::from_str(r#"[{"class_name":"Leaf_Spot","confidence":0.8}]"#).unwrap();
        let wrapped: DetectResponse = serde_json::from_str(
            r#"{"detections":[{"class_name":"Leaf_Spot","confidence":0.8}]}"#,
        )
        .unwrap();
        for parsed in [bare, wrapped] {
            let (DetectResponse::Bare(d) | DetectResponse::Wrapped { detections: d }) = parsed;
            assert_eq!(d, vec![Detection::new("Leaf_Spot", 0.8)]);
        }
    }

    #[tokio::test]
    async fn unreachable_service_is_inference_error() {
        let detector =
            HttpDetector::new("http://127.0.0.1:9/detect", Duration::from_millis(200)).unwrap();
        let frame = CameraFrame {
            width: 1,
            height: 1,
            data: vec![0, 0, 0],
        };
        assert!(matches!(
            detector.detect(&frame).await,
            Err(KrishiError::Inference(_))
        ));
    }
}
