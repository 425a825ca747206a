use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;

use crate::alert::Destination;
use crate::bot::{CommandRouter, MOTION_TITLE};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CommandRouter>,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(router: Arc<CommandRouter>, api_key: &str) -> Self {
        Self {
            router,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/check-door", post(check_door_handler))
        .with_state(state)
}

pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<(), std::io::Error> {
    let app = app(state);

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("starting HTTP server on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await
}

async fn check_door_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if !provided.is_some_and(|key| constant_time_eq(key, &state.api_key)) {
        tracing::warn!("rejected door check with invalid api key");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let destination = Destination::DirectMessage(state.router.principal());
    match state.router.door_check(destination, MOTION_TITLE).await {
        Ok(()) => (StatusCode::OK, "Alert sent").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "door check failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Compares every byte so timing does not reveal how much of the key matched.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use http_body_util::BodyExt;

    use super::*;
    use crate::testutil::Fakes;

    fn state(fakes: &Fakes) -> AppState {
        AppState::new(Arc::new(fakes.router()), "secret")
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn constant_time_eq_matches_only_identical_keys() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret2"));
        assert!(!constant_time_eq("", "secret"));
    }

    #[tokio::test]
    async fn prefix_of_api_key_is_unauthorized() {
        let fakes = Fakes::default();
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", HeaderValue::from_static("secre"));

        let response = check_door_handler(State(state(&fakes)), headers).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(fakes.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_api_key_is_unauthorized() {
        let fakes = Fakes::default();

        let response = check_door_handler(State(state(&fakes)), HeaderMap::new()).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(fakes.snapshots.calls().is_empty());
        assert!(fakes.analyzer.calls().is_empty());
        assert!(fakes.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn wrong_api_key_is_unauthorized() {
        let fakes = Fakes::default();
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", HeaderValue::from_static("Secret"));

        let response = check_door_handler(State(state(&fakes)), headers).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(fakes.snapshots.calls().is_empty());
        assert!(fakes.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn valid_api_key_alerts_principal_privately() {
        let fakes = Fakes::default();
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", HeaderValue::from_static("secret"));

        let response = check_door_handler(State(state(&fakes)), headers).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Alert sent");
        assert_eq!(fakes.snapshots.calls(), vec!["front"]);
        assert_eq!(fakes.analyzer.calls(), vec!["front"]);

        let sent = fakes.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Destination::DirectMessage(42));
        assert_eq!(sent[0].1.title, "Door Alert - Motion Detected");
        assert_eq!(sent[0].1.attachments.len(), 1);
    }

    #[tokio::test]
    async fn delivery_failure_is_bad_gateway() {
        let fakes = Fakes::default();
        fakes.sink.fail();
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", HeaderValue::from_static("secret"));

        let response = check_door_handler(State(state(&fakes)), headers).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.contains("500"));
    }

    #[tokio::test]
    async fn route_is_post_only() {
        let fakes = Fakes::default();
        let server = crate::testutil::serve(app(state(&fakes))).await;
        let client = reqwest::Client::new();

        let get = client.get(format!("{server}/check-door")).send().await.unwrap();
        assert_eq!(get.status().as_u16(), 405);

        let post = client
            .post(format!("{server}/check-door"))
            .header("X-Api-Key", "secret")
            .send()
            .await
            .unwrap();
        assert_eq!(post.status().as_u16(), 200);
        assert_eq!(post.text().await.unwrap(), "Alert sent");
        assert_eq!(fakes.sink.sent().len(), 1);
    }
}
