use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AppError;

/// `Json` whose rejections render through [`AppError`], so malformed bodies
/// get the same `{"error", "message"}` shape as every other failure.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `Path` with the same error rendering as [`ApiJson`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        routing::post,
        Router,
    };
    use serde::Deserialize;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct EchoRequest {
        count: i64,
    }

    async fn echo(ApiPath(id): ApiPath<Uuid>, ApiJson(body): ApiJson<EchoRequest>) -> String {
        format!("{id}:{}", body.count)
    }

    async fn send(uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Vec<u8>) {
        let app = Router::new().route("/items/:id", post(echo));
        let mut request = Request::post(uri);
        if let Some(content_type) = content_type {
            request = request.header(header::CONTENT_TYPE, content_type);
        }
        let response = app
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_well_formed_requests() {
        let id = Uuid::new_v4();
        let (status, bytes) = send(
            &format!("/items/{id}"),
            Some("application/json"),
            r#"{"count":3}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, format!("{id}:3").into_bytes());
    }

    #[tokio::test]
    async fn test_body_rejections_render_as_json() {
        let uri = format!("/items/{}", Uuid::new_v4());
        let cases = [
            (Some("application/json"), r#"{"count":"#),
            (Some("application/json"), r#"{"count":"many"}"#),
            (Some("application/json"), r#"{}"#),
            (None, r#"{"count":3}"#),
        ];

        for (content_type, body) in cases {
            let (status, bytes) = send(&uri, content_type, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
            let body = json(&bytes);
            assert_eq!(body["error"], "validation");
            assert!(body["message"].is_string());
        }
    }

    #[tokio::test]
    async fn test_path_rejection_renders_as_json() {
        let (status, bytes) = send(
            "/items/not-a-uuid",
            Some("application/json"),
            r#"{"count":1}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&bytes)["error"], "validation");
    }
}
