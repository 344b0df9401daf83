//! Integration tests for the HTTP classifier against a mock model server.

use verity_core::{Classifier, Error, Label, PreparedImage};
use verity_inference::{ClassifierConfig, HttpClassifier};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn image(name: &str, data: &[u8]) -> PreparedImage {
    PreparedImage {
        name: name.to_string(),
        mime_type: "image/png".to_string(),
        data: data.to_vec(),
    }
}

fn classifier(server: &MockServer) -> HttpClassifier {
    HttpClassifier::new(ClassifierConfig::default().with_base_url(server.uri()))
        .expect("Failed to create classifier")
}

#[tokio::test]
async fn test_batch_predictions_preserve_input_order() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/models/ai_vs_real_cnn:predict"))
        .and(body_json(serde_json::json!({
            "instances": [{"b64": "YQ=="}, {"b64": "Yg=="}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "predictions": [[0.93], [0.12]]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let predictions = classifier(&mock_server)
        .classify(&[image("a.png", b"a"), image("b.png", b"b")])
        .await
        .expect("classify should succeed");

    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].label, Label::AiGenerated);
    assert_eq!(predictions[0].confidence, 93.0);
    assert_eq!(predictions[1].label, Label::Real);
    assert_eq!(predictions[1].confidence, 88.0);
}

#[tokio::test]
async fn test_custom_threshold_applied() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "predictions": [[0.5]]
        })))
        .mount(&mock_server)
        .await;

    let classifier = HttpClassifier::new(
        ClassifierConfig::default()
            .with_base_url(mock_server.uri())
            .with_threshold(0.6),
    )
    .unwrap();
    let predictions = classifier.classify(&[image("a.png", b"a")]).await.unwrap();
    assert_eq!(predictions[0].label, Label::Real);
    assert_eq!(predictions[0].confidence, 50.0);
}

#[tokio::test]
async fn test_server_error_is_inference_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
        .mount(&mock_server)
        .await;

    let err = classifier(&mock_server)
        .classify(&[image("a.png", b"a")])
        .await
        .unwrap_err();
    match err {
        Error::Inference(msg) => assert!(msg.contains("503")),
        other => panic!("Expected Inference error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prediction_count_mismatch_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "predictions": [[0.9]]
        })))
        .mount(&mock_server)
        .await;

    let err = classifier(&mock_server)
        .classify(&[image("a.png", b"a"), image("b.png", b"b")])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("1 predictions for 2 images"));
}

#[tokio::test]
async fn test_empty_batch_never_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let err = classifier(&mock_server).classify(&[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
