use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    Json as RequestJson,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::auth::{NtlmAuthenticator, SubprocessHelper};
use crate::engine::{
    connect, query_nodes, query_resources, query_services, registration_entries,
    fetch_single_host, ConnectOptions, ConnectResult, InstanceInfo, NodeQueryResult,
    RegistrationEntry,
};
use crate::error::RegistryError;
use crate::model::{Id, ServiceDefinition, ServiceFilter};
use crate::pool::ContextPool;
use crate::store::Store;

const SESSION_HEADER: &str = "x-auth-session";
const IDENTITY_HEADER: &str = "x-forge-identity";

/// How long an unfinished negotiation may sit idle before its session
/// (and helper process) is reclaimed.
const SESSION_TTL: Duration = Duration::from_secs(300);
/// Cap on concurrent unfinished negotiations; each one holds a live
/// helper child process.
const MAX_PENDING_SESSIONS: usize = 64;

struct AuthSession {
    /// Present while negotiation is in flight. Dropped once the identity
    /// is established, which also reaps the helper process.
    authenticator: Option<NtlmAuthenticator<SubprocessHelper>>,
    identity: Option<String>,
    created_at: Instant,
}

fn purge_stale(sessions: &mut HashMap<Uuid, AuthSession>) {
    sessions.retain(|_, s| s.identity.is_some() || s.created_at.elapsed() < SESSION_TTL);
}

fn pending_count(sessions: &HashMap<Uuid, AuthSession>) -> usize {
    sessions.values().filter(|s| s.identity.is_none()).count()
}

pub struct AppState<S> {
    pub store: Arc<S>,
    pub pool: Arc<ContextPool>,
    pub instance: InstanceInfo,
    pub machine_name: String,
    pub helper_path: Option<PathBuf>,
    sessions: Mutex<HashMap<Uuid, AuthSession>>,
}

impl<S> AppState<S> {
    pub fn new(
        store: Arc<S>,
        pool: Arc<ContextPool>,
        instance: InstanceInfo,
        machine_name: String,
        helper_path: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            pool,
            instance,
            machine_name,
            helper_path,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub type Fault = (StatusCode, Json<ErrorResponse>);

fn fault(err: RegistryError) -> Fault {
    let status = match &err {
        RegistryError::AccessDenied(_) => StatusCode::UNAUTHORIZED,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_client_fault() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorResponse {
        error: err.to_string(),
        code: err.code().to_string(),
    };
    (status, Json(body))
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeRequest {
    pub session: Option<Uuid>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub session: Uuid,
    pub token: String,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

/// One round of the NTLM handshake. The first call creates a session and
/// spawns a helper process for it; subsequent calls carry the session id
/// and the client's next token.
pub async fn auth_challenge<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    RequestJson(request): RequestJson<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, Fault> {
    let helper_path = state.helper_path.clone().ok_or_else(|| {
        fault(RegistryError::AccessDenied(
            "no credential helper is configured".to_string(),
        ))
    })?;

    // the session leaves the map while its helper is talked to, so one
    // slow helper never stalls other sessions or identity lookups
    let (session_id, mut session) = match request.session {
        Some(id) => {
            let session = state.sessions.lock().remove(&id).ok_or_else(|| {
                fault(RegistryError::AccessDenied("unknown session".to_string()))
            })?;
            (id, session)
        }
        None => {
            {
                let mut sessions = state.sessions.lock();
                purge_stale(&mut sessions);
                if pending_count(&sessions) >= MAX_PENDING_SESSIONS {
                    return Err(fault(RegistryError::AccessDenied(
                        "too many open negotiations".to_string(),
                    )));
                }
            }
            let helper = tokio::task::spawn_blocking(move || {
                SubprocessHelper::spawn(&helper_path)
            })
            .await
            .map_err(|e| fault(RegistryError::Internal(e.to_string())))?
            .map_err(fault)?;
            (
                Uuid::new_v4(),
                AuthSession {
                    authenticator: Some(NtlmAuthenticator::new(helper)),
                    identity: None,
                    created_at: Instant::now(),
                },
            )
        }
    };

    // an already authenticated session just reports its identity
    if session.identity.is_some() {
        let response = ChallengeResponse {
            session: session_id,
            token: String::new(),
            authenticated: true,
            identity: session.identity.clone(),
        };
        state.sessions.lock().insert(session_id, session);
        return Ok(Json(response));
    }

    let authenticator = session.authenticator.take().ok_or_else(|| {
        fault(RegistryError::Internal(
            "session has no negotiation in flight".to_string(),
        ))
    })?;

    // pipe I/O with the helper process blocks
    let token = request.token.clone();
    let (authenticator, result) = tokio::task::spawn_blocking(move || {
        let mut authenticator = authenticator;
        let result = authenticator.challenge(token.as_deref());
        (authenticator, result)
    })
    .await
    .map_err(|e| fault(RegistryError::Internal(e.to_string())))?;

    let exchange = match result {
        // the session was already removed from the map; dropping it here
        // also reaps the helper
        Err(e) => return Err(fault(e)),
        Ok(exchange) => exchange,
    };

    if exchange.authenticated {
        session.identity = Some(exchange.token.clone());
        // authenticator is not restored: negotiation is over and the
        // helper process goes with it
    } else {
        session.authenticator = Some(authenticator);
    }

    let identity = session.identity.clone();
    state.sessions.lock().insert(session_id, session);

    Ok(Json(ChallengeResponse {
        session: session_id,
        authenticated: exchange.authenticated,
        identity,
        token: exchange.token,
    }))
}

/// Resolves the caller's identity: an authenticated NTLM session when a
/// helper is configured, the identity header otherwise.
fn caller_identity<S>(state: &AppState<S>, headers: &HeaderMap) -> Result<String, Fault> {
    if state.helper_path.is_none() {
        let identity = headers
            .get(IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous");
        return Ok(identity.to_string());
    }

    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| {
            fault(RegistryError::AccessDenied(
                "an authenticated session is required".to_string(),
            ))
        })?;

    let sessions = state.sessions.lock();
    sessions
        .get(&session_id)
        .and_then(|s| s.identity.clone())
        .ok_or_else(|| {
            fault(RegistryError::AccessDenied(
                "session is not authenticated".to_string(),
            ))
        })
}

/// Resolves an optional tenant host name to its pool tag.
async fn host_tag<S: Store>(
    state: &AppState<S>,
    host: Option<&str>,
) -> Result<Option<String>, Fault> {
    match host {
        None => Ok(None),
        Some(name) => {
            let host = fetch_single_host(state.store.as_ref(), &state.pool, None, name)
                .await
                .map_err(fault)?;
            Ok(Some(host.id))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectRequest {
    pub host: Option<String>,
    #[serde(flatten)]
    pub options: ConnectOptions,
}

pub async fn location_connect<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    RequestJson(request): RequestJson<ConnectRequest>,
) -> Result<Json<ConnectResult>, Fault> {
    let identity = caller_identity(&state, &headers)?;
    let tag = host_tag(&state, request.host.as_deref()).await?;

    connect(
        state.store.as_ref(),
        &state.pool,
        tag.as_deref(),
        &identity,
        &request.options,
    )
    .await
    .map(Json)
    .map_err(fault)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryServicesRequest {
    pub host: Option<String>,
    pub filters: Vec<ServiceFilter>,
}

pub async fn location_query_services<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    RequestJson(request): RequestJson<QueryServicesRequest>,
) -> Result<Json<Vec<ServiceDefinition>>, Fault> {
    let tag = host_tag(&state, request.host.as_deref()).await?;

    query_services(
        state.store.as_ref(),
        &state.pool,
        tag.as_deref(),
        &request.filters,
    )
    .await
    .map(Json)
    .map_err(fault)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryNodesRequest {
    pub host: Option<String>,
    pub path_specs: Vec<String>,
    pub resource_type_filters: Vec<Id>,
}

pub async fn catalog_query_nodes<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    RequestJson(request): RequestJson<QueryNodesRequest>,
) -> Result<Json<NodeQueryResult>, Fault> {
    let tag = host_tag(&state, request.host.as_deref()).await?;

    query_nodes(
        state.store.as_ref(),
        &state.pool,
        tag.as_deref(),
        &request.path_specs,
        &request.resource_type_filters,
    )
    .await
    .map(Json)
    .map_err(fault)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResourcesRequest {
    pub host: Option<String>,
    pub resource_ids: Vec<Id>,
    pub resource_type_ids: Vec<Id>,
}

pub async fn catalog_query_resources<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    RequestJson(request): RequestJson<QueryResourcesRequest>,
) -> Result<Json<NodeQueryResult>, Fault> {
    let tag = host_tag(&state, request.host.as_deref()).await?;

    query_resources(
        state.store.as_ref(),
        &state.pool,
        tag.as_deref(),
        &request.resource_ids,
        &request.resource_type_ids,
    )
    .await
    .map(Json)
    .map_err(fault)
}

pub async fn registration_get_entries<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(tool_id): Path<String>,
) -> Result<Json<Vec<RegistrationEntry>>, Fault> {
    let tool_id = if tool_id == "-" { "" } else { tool_id.as_str() };
    registration_entries(tool_id, &state.instance.instance_id, &state.machine_name)
        .map(Json)
        .map_err(fault)
}
