//! HTTP route handlers for the support chat API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::chat::analytics::{AgentPerformance, AnalyticsWindow, SessionOverview};
use crate::chat::auth::AuthorizationGuard;
use crate::chat::core::actor::Actor;
use crate::chat::core::errors::{ChatError, ErrorKind};
use crate::chat::core::ids::SessionId;
use crate::chat::core::message::ChatMessage;
use crate::chat::core::session::{
    AgentIdentity, ChatSession, CustomerIdentity, Priority, SessionStatus,
};
use crate::chat::routing::Room;
use crate::chat::storage::SessionFilter;

use super::state::AppState;
use super::ws::ws_handler;

/// Header carrying the anonymous correlation id on REST calls.
pub const ANONYMOUS_ID_HEADER: &str = "x-anonymous-id";

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/api/chat/sessions", post(create_session).get(list_sessions))
        .route("/api/chat/sessions/{id}", get(get_session))
        .route("/api/chat/sessions/{id}/messages", get(list_messages))
        .route("/api/chat/sessions/{id}/assign", post(assign_agent))
        .route("/api/chat/sessions/{id}/transfer", post(transfer_session))
        .route("/api/chat/sessions/{id}/status", post(update_status))
        .route("/api/chat/sessions/{id}/close", post(close_session))
        .route("/api/chat/sessions/{id}/feedback", post(save_feedback))
        .route("/api/chat/analytics/overview", get(analytics_overview))
        .route("/api/chat/analytics/agents", get(analytics_agents))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "support-chat",
        "version": env!("CARGO_PKG_VERSION"),
        "staffOnline": state.hub.member_count(&Room::Staff),
    }))
}

/// Token from an `Authorization: Bearer` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn api_error(err: &ChatError, trusted: bool) -> (StatusCode, String) {
    let (status, fallback) = match err.kind() {
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Not found"),
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "Invalid request"),
        ErrorKind::Authorization => (StatusCode::FORBIDDEN, "Forbidden"),
        ErrorKind::Persistence => {
            tracing::error!(%err, "Request failed in storage");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    };
    let message = match err.kind() {
        ErrorKind::Validation => err.to_string(),
        _ => err.client_message(trusted, fallback),
    };
    (status, message)
}

/// Resolve the caller: a bearer token must verify; otherwise an anonymous id
/// header makes the caller anonymous.
fn request_actor(state: &AppState, headers: &HeaderMap) -> ApiResult<Actor> {
    if let Some(token) = bearer_token(headers) {
        return state
            .gate
            .authenticate(&token)
            .map_err(|err| (StatusCode::UNAUTHORIZED, err.to_string()));
    }
    headers
        .get(ANONYMOUS_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| Actor::Anonymous { id: id.to_string() })
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "authentication required".to_string(),
            )
        })
}

fn require_staff(state: &AppState, headers: &HeaderMap) -> ApiResult<Actor> {
    let actor = request_actor(state, headers)?;
    if actor.is_staff() {
        Ok(actor)
    } else {
        Err((StatusCode::FORBIDDEN, "staff access required".to_string()))
    }
}

async fn require_participant(
    state: &AppState,
    headers: &HeaderMap,
    session_id: SessionId,
) -> ApiResult<(Actor, ChatSession)> {
    let actor = request_actor(state, headers)?;
    let session = state
        .lifecycle
        .get(session_id)
        .await
        .map_err(|err| api_error(&err, actor.is_staff()))?;
    AuthorizationGuard::check_join(&actor, &session)
        .map_err(|err| api_error(&err, actor.is_staff()))?;
    Ok((actor, session))
}

/// Session creation request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Display name when the caller's token carries none.
    #[serde(default)]
    pub name: Option<String>,
    /// Contact email when the caller's token carries none.
    #[serde(default)]
    pub email: Option<String>,
    /// Advisory priority.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Customer to open the session for; staff only.
    #[serde(default)]
    pub customer: Option<CustomerIdentity>,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<ChatSession>)> {
    let actor = request_actor(&state, &headers)?;
    let identity = match (&actor, request.customer) {
        (Actor::Staff { .. }, Some(customer)) => customer,
        (Actor::Staff { .. }, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "staff must name the customer".to_string(),
            ));
        }
        (Actor::Anonymous { id }, _) => CustomerIdentity {
            id: Some(id.clone()),
            name: request.name,
            email: request.email,
            is_anonymous: true,
        },
        (Actor::Customer { id, name, email }, _) => CustomerIdentity {
            id: Some(id.clone()),
            name: name.clone().or(request.name),
            email: email.clone().or(request.email),
            is_anonymous: false,
        },
    };

    let session = state
        .lifecycle
        .create(identity, request.priority.unwrap_or_default())
        .await
        .map_err(|err| api_error(&err, actor.is_staff()))?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Listing filter.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    /// Only sessions in this status.
    pub status: Option<SessionStatus>,
    /// Only sessions of this agent.
    pub agent_id: Option<String>,
    /// Created at or after.
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    /// Created before.
    pub to: Option<chrono::DateTime<chrono::Utc>>,
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<ChatSession>>> {
    require_staff(&state, &headers)?;
    let filter = SessionFilter {
        from: query.from,
        to: query.to,
        status: query.status,
        agent_id: query.agent_id,
    };
    state
        .lifecycle
        .list(filter)
        .await
        .map(Json)
        .map_err(|err| api_error(&err, true))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<ChatSession>> {
    let (_, session) = require_participant(&state, &headers, session_id).await?;
    Ok(Json(session))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let (actor, _) = require_participant(&state, &headers, session_id).await?;
    state
        .lifecycle
        .transcript(session_id)
        .await
        .map(Json)
        .map_err(|err| api_error(&err, actor.is_staff()))
}

/// Assignment request. Without an agent id the caller assigns themselves.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    /// Agent to assign.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Agent display name.
    #[serde(default)]
    pub agent_name: Option<String>,
}

async fn assign_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<ChatSession>> {
    let actor = require_staff(&state, &headers)?;
    let agent = match request.agent_id {
        Some(id) => AgentIdentity {
            id,
            name: request.agent_name,
        },
        None => AgentIdentity {
            id: actor.id().to_string(),
            name: actor.name().map(str::to_string).or(request.agent_name),
        },
    };
    state
        .lifecycle
        .assign_agent(session_id, agent)
        .await
        .map(Json)
        .map_err(|err| api_error(&err, true))
}

/// Transfer request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Receiving agent.
    pub to_agent_id: String,
    /// Receiving agent's display name.
    #[serde(default)]
    pub to_agent_name: Option<String>,
}

async fn transfer_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<Json<ChatSession>> {
    require_staff(&state, &headers)?;
    let to = AgentIdentity {
        id: request.to_agent_id,
        name: request.to_agent_name,
    };
    state
        .lifecycle
        .transfer(session_id, to)
        .await
        .map(Json)
        .map_err(|err| api_error(&err, true))
}

/// Status change request.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// Target status.
    pub status: SessionStatus,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<ChatSession>> {
    let actor = require_staff(&state, &headers)?;
    state
        .lifecycle
        .update_status(session_id, request.status, actor.label())
        .await
        .map(Json)
        .map_err(|err| api_error(&err, true))
}

/// Close request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    /// Label recorded as the closer.
    #[serde(default)]
    pub closed_by: Option<String>,
}

/// Close response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResponse {
    /// Session after the call.
    pub session: ChatSession,
    /// Whether this call closed it.
    pub closed: bool,
}

async fn close_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
    Json(request): Json<CloseRequest>,
) -> ApiResult<Json<CloseResponse>> {
    let (actor, _) = require_participant(&state, &headers, session_id).await?;
    let closed_by = request
        .closed_by
        .filter(|label| !label.trim().is_empty())
        .unwrap_or_else(|| actor.label().to_string());
    let (session, closed) = state
        .lifecycle
        .close(session_id, &closed_by)
        .await
        .map_err(|err| api_error(&err, actor.is_staff()))?;
    Ok(Json(CloseResponse { session, closed }))
}

/// Feedback request.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Rating from 1 to 5.
    pub rating: u8,
    /// Free-form comments.
    #[serde(default)]
    pub comments: Option<String>,
}

async fn save_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<SessionId>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<ChatSession>> {
    let (actor, _) = require_participant(&state, &headers, session_id).await?;
    state
        .lifecycle
        .save_feedback(session_id, request.rating, request.comments)
        .await
        .map(Json)
        .map_err(|err| api_error(&err, actor.is_staff()))
}

async fn analytics_overview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(window): Query<AnalyticsWindow>,
) -> ApiResult<Json<SessionOverview>> {
    require_staff(&state, &headers)?;
    state
        .analytics
        .overview(window)
        .await
        .map(Json)
        .map_err(|err| api_error(&err, true))
}

async fn analytics_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(window): Query<AnalyticsWindow>,
) -> ApiResult<Json<Vec<AgentPerformance>>> {
    require_staff(&state, &headers)?;
    state
        .analytics
        .agent_performance(window)
        .await
        .map(Json)
        .map_err(|err| api_error(&err, true))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::chat::auth::{TokenClaims, TokenVerifier};
    use crate::chat::core::config::{AuthConfig, ChatConfig, StorageConfig};

    const SECRET: &str = "route-test-secret-0123456789";

    async fn app() -> (Router, Arc<AppState>) {
        let config = ChatConfig {
            storage: StorageConfig::in_memory(),
            auth: AuthConfig {
                token_secret: Some(SECRET.to_string()),
                allow_anonymous_fallback: true,
            },
            ..ChatConfig::default()
        };
        let state = AppState::new(config).await.unwrap();
        (create_router(Arc::clone(&state)), state)
    }

    fn token(id: &str, account_type: Option<&str>) -> String {
        TokenVerifier::new(SECRET)
            .issue(&TokenClaims {
                id: Some(id.to_string()),
                user_id: None,
                name: Some(format!("User {id}")),
                email: None,
                account_type: account_type.map(str::to_string),
                exp: None,
            })
            .unwrap()
    }

    fn request(method: &str, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = app().await;
        let (status, body) = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn customer_creates_and_staff_assigns() {
        let (app, _) = app().await;
        let customer = token("cust1", None);
        let staff = token("agent1", Some("support"));

        let (status, session) = send(
            &app,
            request("POST", "/api/chat/sessions", Some(&customer), Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session["status"], "pending");
        assert_eq!(session["isFirstChat"], true);
        let id = session["sessionId"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            request(
                "POST",
                &format!("/api/chat/sessions/{id}/assign"),
                Some(&customer),
                Some(json!({})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, assigned) = send(
            &app,
            request(
                "POST",
                &format!("/api/chat/sessions/{id}/assign"),
                Some(&staff),
                Some(json!({})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(assigned["status"], "active");
        assert_eq!(assigned["agent"]["id"], "agent1");
    }

    #[tokio::test]
    async fn unknown_session_is_404_for_staff() {
        let (app, _) = app().await;
        let staff = token("agent1", Some("admin"));
        let (status, _) = send(
            &app,
            request(
                "GET",
                &format!("/api/chat/sessions/{}", SessionId::new()),
                Some(&staff),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_customers_cannot_read_a_session() {
        let (app, state) = app().await;
        let session = state
            .lifecycle
            .create(
                CustomerIdentity {
                    id: Some("cust1".to_string()),
                    ..CustomerIdentity::default()
                },
                Priority::Normal,
            )
            .await
            .unwrap();

        let intruder = token("cust2", None);
        let (status, _) = send(
            &app,
            request(
                "GET",
                &format!("/api/chat/sessions/{}/messages", session.session_id),
                Some(&intruder),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn bad_feedback_rating_is_400() {
        let (app, state) = app().await;
        let session = state
            .lifecycle
            .create(
                CustomerIdentity {
                    id: Some("cust1".to_string()),
                    ..CustomerIdentity::default()
                },
                Priority::Normal,
            )
            .await
            .unwrap();
        let customer = token("cust1", None);

        let (status, _) = send(
            &app,
            request(
                "POST",
                &format!("/api/chat/sessions/{}/feedback", session.session_id),
                Some(&customer),
                Some(json!({ "rating": 9 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analytics_require_staff() {
        let (app, _) = app().await;
        let customer = token("cust1", None);
        let staff = token("agent1", Some("manager"));

        let (status, _) = send(
            &app,
            request("GET", "/api/chat/analytics/overview", Some(&customer), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, overview) = send(
            &app,
            request("GET", "/api/chat/analytics/overview", Some(&staff), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(overview["totalSessions"], 0);
    }

    #[tokio::test]
    async fn invalid_bearer_token_is_401() {
        let (app, _) = app().await;
        let (status, _) = send(
            &app,
            request("GET", "/api/chat/sessions", Some("garbage"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
