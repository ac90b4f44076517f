mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::TinyArtifact;
use finmood::core::ClassificationResponse;
use finmood::handler::decode_response;
use finmood::server;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

async fn app(artifact: &TinyArtifact) -> anyhow::Result<Router> {
    let pipeline = artifact.pipeline().await?;
    Ok(server::router(Arc::new(pipeline)))
}

fn invocation(body: &str, content_type: Option<&str>, accept: Option<&str>) -> Request<Body> {
    let mut request = Request::post("/invocations");
    if let Some(content_type) = content_type {
        request = request.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(accept) = accept {
        request = request.header(header::ACCEPT, accept);
    }
    request.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> anyhow::Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn ping_answers_ok() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    let response = app(&artifact)
        .await?
        .oneshot(Request::get("/ping").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn single_invocation_returns_one_record() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    let response = app(&artifact)
        .await?
        .oneshot(invocation(
            r#"{"inputs": "Nike sales have increased"}"#,
            Some("application/json"),
            None,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    match decode_response(&bytes)? {
        ClassificationResponse::Single(record) => {
            assert_eq!(record.text, "Nike sales have increased");
            assert_eq!(record.probabilities.len(), 3);
        }
        other => panic!("expected a single record, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn batch_invocation_returns_a_list() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    let response = app(&artifact)
        .await?
        .oneshot(invocation(
            r#"{"inputs": ["stock fell", "profit rose", "the shares"]}"#,
            Some("application/json; charset=utf-8"),
            Some("*/*"),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await?;
    let predictions = value["predictions"]
        .as_array()
        .expect("predictions should be a list");
    let texts: Vec<_> = predictions
        .iter()
        .map(|p| p["text"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(texts, ["stock fell", "profit rose", "the shares"]);
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_bad_request() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    let router = app(&artifact).await?;

    for body in [
        r#"{"wrong_key": "text"}"#,
        r#"{"inputs": 42}"#,
        r#"{"inputs": []}"#,
        "not json",
    ] {
        let response = router
            .clone()
            .oneshot(invocation(body, Some("application/json"), None))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let value = body_json(response).await?;
        assert!(value["error"].as_str().is_some_and(|e| !e.is_empty()));
    }
    Ok(())
}

#[tokio::test]
async fn non_json_content_type_is_unsupported() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    let router = app(&artifact).await?;

    for content_type in [Some("text/csv"), None] {
        let response = router
            .clone()
            .oneshot(invocation(r#"{"inputs": "x"}"#, content_type, None))
            .await?;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    let response = router
        .oneshot(invocation(r#"{"inputs": "x"}"#, Some("text/csv"), None))
        .await?;
    let value = body_json(response).await?;
    assert!(value["error"]
        .as_str()
        .is_some_and(|e| e.contains("text/csv")));
    Ok(())
}

#[tokio::test]
async fn non_json_accept_is_not_acceptable() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    let response = app(&artifact)
        .await?
        .oneshot(invocation(
            r#"{"inputs": "x"}"#,
            Some("application/json"),
            Some("text/csv"),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    Ok(())
}

#[tokio::test]
async fn accept_lists_containing_json_are_served() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    let router = app(&artifact).await?;

    for accept in ["application/json, text/plain, */*", "text/html,application/json"] {
        let response = router
            .clone()
            .oneshot(invocation(
                r#"{"inputs": "nike sales"}"#,
                Some("application/json"),
                Some(accept),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::OK, "{accept}");
        let value = body_json(response).await?;
        assert_eq!(value["predictions"]["text"], "nike sales");
    }
    Ok(())
}

#[tokio::test]
async fn failed_forward_pass_is_internal_error() -> anyhow::Result<()> {
    let artifact = TinyArtifact::new()?;
    // Longer than the 32 position embeddings of the tiny model.
    let pipeline = artifact.builder().max_length(64).build().await?;
    let router = server::router(Arc::new(pipeline));

    let long = "nike sales have increased ".repeat(20);
    let body = serde_json::json!({ "inputs": long }).to_string();
    let response = router
        .oneshot(invocation(&body, Some("application/json"), None))
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let value = body_json(response).await?;
    assert!(value["error"].as_str().is_some_and(|e| !e.is_empty()));
    Ok(())
}
