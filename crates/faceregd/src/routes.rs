//! HTTP surface: multipart uploads in, JSON out.

use crate::config::Config;
use crate::engine::EngineError;
use crate::service::{FaceSearch, FaceService, Recognition, RegisterOutcome, ServiceError};
use crate::store::StoredFace;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

type AppState = Arc<FaceService>;

pub fn router(service: AppState, config: &Config) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/register/", post(register))
        .route("/recognize", post(recognize))
        .route("/face_search", post(face_search))
        .route("/person_search", post(person_search))
        .route("/faces", post(add_face))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        // A literal `*` cannot be combined with credentials; echo the caller's
        // origin instead.
        tracing::warn!("CORS allows any origin");
        AllowOrigin::mirror_request()
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
}

/// Error responses. Internal details go to the log, not the client.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Conflict(&'static str),
    NoFace,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message.to_string()),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "duplicate_name", message.to_string()),
            ApiError::NoFace => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "no_face",
                "no face detected in image".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal server error".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": code, "message": message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Engine(EngineError::Decode(e)) => {
                tracing::debug!(error = %e, "rejecting undecodable upload");
                ApiError::BadRequest("uploaded file is not a supported image".to_string())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::Internal
            }
        }
    }
}

/// Collected multipart fields: the `file` part as bytes, the rest as text.
#[derive(Default)]
struct Upload {
    file: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = Upload::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
                upload.file = Some(bytes.to_vec());
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read field {name}: {e}")))?;
                upload.fields.insert(name, text);
            }
        }
        Ok(upload)
    }

    fn take_file(&mut self) -> Result<Vec<u8>, ApiError> {
        match self.file.take() {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(ApiError::BadRequest("missing field: file".to_string())),
        }
    }

    fn text(&self, key: &str) -> Result<String, ApiError> {
        match self.fields.get(key).map(|v| v.trim()) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(ApiError::BadRequest(format!("missing field: {key}"))),
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    user_name: String,
    document: Vec<String>,
    files: Vec<String>,
}

impl SearchResponse {
    fn new(user_name: String, faces: Vec<StoredFace>) -> Self {
        let (document, files) = faces
            .into_iter()
            .map(|f| (f.document_id, BASE64.encode(&f.data)))
            .unzip();
        Self { user_name, document, files }
    }
}

async fn register(State(svc): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let mut upload = Upload::read(multipart).await?;
    let user_name = upload.text("user_name")?;
    let image = upload.take_file()?;

    match svc.register(&user_name, image).await? {
        RegisterOutcome::Created => Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "status": "created", "user_name": user_name })),
        )
            .into_response()),
        RegisterOutcome::DuplicateName => Err(ApiError::Conflict("user already exists")),
        RegisterOutcome::NoFaceFound => Err(ApiError::NoFace),
    }
}

async fn recognize(State(svc): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let image = Upload::read(multipart).await?.take_file()?;

    match svc.recognize(image).await? {
        Recognition::Matched { name, distance } => {
            Ok(Json(serde_json::json!({ "user_name": name, "distance": distance })).into_response())
        }
        Recognition::Unknown => Err(ApiError::NotFound("no matching person")),
        Recognition::NoFaceFound => Err(ApiError::NoFace),
    }
}

async fn face_search(State(svc): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let image = Upload::read(multipart).await?.take_file()?;

    match svc.face_search(image).await? {
        FaceSearch::Found { person, faces } => Ok(Json(SearchResponse::new(person, faces)).into_response()),
        FaceSearch::Unknown => Err(ApiError::NotFound("no matching person")),
        FaceSearch::NoFaceFound => Err(ApiError::NoFace),
    }
}

async fn person_search(State(svc): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let user_name = Upload::read(multipart).await?.text("user_name")?;

    let faces = svc.person_search(&user_name).await?;
    if faces.is_empty() {
        return Err(ApiError::NotFound("no images stored for person"));
    }
    Ok(Json(SearchResponse::new(user_name, faces)).into_response())
}

async fn add_face(State(svc): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let mut upload = Upload::read(multipart).await?;
    let person = upload.text("person")?;
    let document_id = upload.text("document_id")?;
    let image = upload.take_file()?;

    let id = svc.add_face(&person, &document_id, image).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response())
}

async fn status(State(svc): State<AppState>) -> impl IntoResponse {
    Json(svc.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::tests::{png, ColourModel};
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::Request;
    use facereg_core::{ExtractSettings, MatchStrategy, DEFAULT_MATCH_THRESHOLD};
    use tower::ServiceExt;

    const BOUNDARY: &str = "facereg-test-boundary";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, Vec<u8>),
    }

    fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                    );
                }
                Part::File(name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"upload.png\"\r\n\
                             Content-Type: image/png\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&bytes);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post(uri: &str, parts: Vec<Part<'_>>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    async fn app() -> Router {
        app_with(&Config::default()).await
    }

    async fn app_with(config: &Config) -> Router {
        let store = Store::open_in_memory().await.unwrap();
        let engine = spawn_engine(ColourModel, ExtractSettings::default()).unwrap();
        let svc = Arc::new(FaceService::new(store, engine, MatchStrategy::First, DEFAULT_MATCH_THRESHOLD));
        router(svc, config)
    }

    fn status_from(origin: &str) -> Request<Body> {
        Request::builder()
            .uri("/status")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_register_and_recognize() {
        let app = app().await;

        let (status, body) = send(
            &app,
            post("/register/", vec![Part::Text("user_name", "alice"), Part::File("file", png([40, 80, 120]))]),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user_name"], "alice");

        let (status, body) = send(&app, post("/recognize", vec![Part::File("file", png([40, 80, 120]))])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_name"], "alice");

        let (status, body) = send(&app, post("/recognize", vec![Part::File("file", png([255, 255, 255]))])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_register_outcomes() {
        let app = app().await;
        let register = |name: &'static str, rgb: [u8; 3]| {
            post("/register", vec![Part::Text("user_name", name), Part::File("file", png(rgb))])
        };

        assert_eq!(send(&app, register("bob", [1, 2, 3])).await.0, StatusCode::CREATED);

        let (status, body) = send(&app, register("bob", [9, 9, 9])).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "duplicate_name");

        let (status, body) = send(&app, register("carol", [0, 0, 0])).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "no_face");
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = app().await;

        let (status, _) = send(&app, post("/register/", vec![Part::File("file", png([1, 1, 1]))])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, post("/recognize", vec![Part::Text("user_name", "x")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, post("/recognize", vec![Part::File("file", b"garbage".to_vec())])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_searches() {
        let app = app().await;
        send(
            &app,
            post("/register/", vec![Part::Text("user_name", "dave"), Part::File("file", png([0, 200, 0]))]),
        )
        .await;

        let (status, body) = send(
            &app,
            post(
                "/faces",
                vec![
                    Part::Text("person", "dave"),
                    Part::Text("document_id", "doc-1"),
                    Part::File("file", vec![7, 7, 7]),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["id"].is_string());

        let (status, body) = send(&app, post("/face_search", vec![Part::File("file", png([0, 200, 0]))])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_name"], "dave");
        assert_eq!(body["document"], serde_json::json!(["doc-1"]));
        assert_eq!(body["files"], serde_json::json!([BASE64.encode([7u8, 7, 7])]));

        let (status, _) = send(&app, post("/face_search", vec![Part::File("file", png([0, 0, 200]))])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, post("/person_search", vec![Part::Text("user_name", "dave")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["document"], serde_json::json!(["doc-1"]));

        let (status, _) = send(&app, post("/person_search", vec![Part::Text("user_name", "erin")])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status() {
        let app = app().await;
        let req = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registered"], 0);
        assert_eq!(body["strategy"], "first");
    }

    #[tokio::test]
    async fn test_cors_listed_origin() {
        let app = app().await;
        let resp = app.clone().oneshot(status_from("http://localhost:3000")).await.unwrap();
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let resp = app.oneshot(status_from("https://elsewhere.example")).await.unwrap();
        assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_cors_wildcard_origin_mirrors_caller() {
        let config = Config {
            cors_origins: vec!["*".to_string()],
            ..Config::default()
        };
        let app = app_with(&config).await;
        let resp = app.oneshot(status_from("https://any.example")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://any.example");
    }
}
