use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::approval::ForceEnrollForm;
use super::directory::StudentDirectory;
use super::domain::{AdminId, EventId, RequestId, SchoolId};
use super::ledger::ParticipationForm;
use super::notify::DecisionNotifier;
use super::registry::{EventDraft, EventPatch};
use super::repository::{EventRepository, ParticipationRepository, RepositoryError};
use super::service::{ParticipationError, ParticipationService};
use super::validation::ValidationErrors;

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_HEADER: &str = "x-actor-id";

type SharedService<R, D, N> = Arc<ParticipationService<R, D, N>>;

/// Caller identity as asserted by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    School(SchoolId),
    Admin(AdminId),
}

impl Actor {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Response> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let (Some(role), Some(id)) = (read(ROLE_HEADER), read(ACTOR_HEADER)) else {
            return Err(unauthorized("missing actor identity"));
        };

        match role.to_ascii_lowercase().as_str() {
            "school" => Ok(Self::School(SchoolId(id.to_string()))),
            "admin" => Ok(Self::Admin(AdminId(id.to_string()))),
            _ => Err(unauthorized("unknown actor role")),
        }
    }
}

fn unauthorized(message: &str) -> Response {
    let payload = json!({ "error": message });
    (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
}

fn forbidden(required: &str) -> Response {
    let payload = json!({ "error": format!("{required} role required") });
    (StatusCode::FORBIDDEN, axum::Json(payload)).into_response()
}

fn require_admin(headers: &HeaderMap) -> Result<AdminId, Response> {
    match Actor::from_headers(headers)? {
        Actor::Admin(id) => Ok(id),
        Actor::School(_) => Err(forbidden("admin")),
    }
}

fn require_school(headers: &HeaderMap) -> Result<SchoolId, Response> {
    match Actor::from_headers(headers)? {
        Actor::School(id) => Ok(id),
        Actor::Admin(_) => Err(forbidden("school")),
    }
}

pub(crate) fn error_response(err: ParticipationError) -> Response {
    let status = match &err {
        ParticipationError::Validation(errors) => {
            let payload = json!({
                "error": err.to_string(),
                "fields": errors,
            });
            return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
        }
        ParticipationError::EventNotFound(_)
        | ParticipationError::ParticipationNotFound { .. }
        | ParticipationError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        ParticipationError::EventArchived(_)
        | ParticipationError::Transition(_)
        | ParticipationError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        ParticipationError::Repository(RepositoryError::Unavailable(_))
        | ParticipationError::Directory(_)
        | ParticipationError::Export(_) => {
            error!(error = %err, "participation request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let payload = json!({ "error": err.to_string() });
    (status, axum::Json(payload)).into_response()
}

/// Bodies are decoded after the identity check so unauthenticated callers always see 401.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|err| {
        let payload = json!({ "error": format!("invalid request body: {err}") });
        (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
    })
}

fn respond<T: serde::Serialize>(
    status: StatusCode,
    result: Result<T, ParticipationError>,
) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveCommand {
    #[serde(default)]
    pub request_ids: Vec<RequestId>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectCommand {
    #[serde(default)]
    pub request_ids: Vec<RequestId>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionCommand {
    #[serde(default)]
    pub request_ids: Vec<RequestId>,
}

/// Router exposing the event registry, participation ledger and approval workflow.
pub fn participation_router<R, D, N>(service: SharedService<R, D, N>) -> Router
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    Router::new()
        .route(
            "/events",
            get(list_events_handler::<R, D, N>).post(create_event_handler::<R, D, N>),
        )
        .route(
            "/events/:event_id",
            get(event_handler::<R, D, N>)
                .patch(update_event_handler::<R, D, N>)
                .delete(delete_event_handler::<R, D, N>),
        )
        .route(
            "/events/:event_id/archive",
            post(archive_event_handler::<R, D, N>),
        )
        .route(
            "/events/:event_id/participate",
            post(join_handler::<R, D, N>)
                .put(edit_handler::<R, D, N>)
                .delete(withdraw_handler::<R, D, N>),
        )
        .route("/events/:event_id/manage", get(manage_handler::<R, D, N>))
        .route("/events/:event_id/approve", put(approve_handler::<R, D, N>))
        .route(
            "/events/:event_id/manage/reject",
            put(reject_handler::<R, D, N>),
        )
        .route("/events/:event_id/enroll", put(enroll_handler::<R, D, N>))
        .route(
            "/events/:event_id/force-enroll",
            post(force_enroll_handler::<R, D, N>),
        )
        .route(
            "/events/:event_id/roster.csv",
            get(roster_csv_handler::<R, D, N>),
        )
        .with_state(service)
}

pub(crate) async fn create_event_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = require_admin(&headers) {
        return rejection;
    }
    let draft: EventDraft = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    respond(StatusCode::CREATED, service.create_event(draft, Utc::now()))
}

pub(crate) async fn list_events_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = Actor::from_headers(&headers) {
        return rejection;
    }
    respond(StatusCode::OK, service.events())
}

pub(crate) async fn event_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = Actor::from_headers(&headers) {
        return rejection;
    }
    respond(StatusCode::OK, service.event(&EventId(event_id)))
}

pub(crate) async fn update_event_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = require_admin(&headers) {
        return rejection;
    }
    let patch: EventPatch = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    respond(
        StatusCode::OK,
        service.update_event(&EventId(event_id), patch),
    )
}

pub(crate) async fn delete_event_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = require_admin(&headers) {
        return rejection;
    }
    respond(StatusCode::OK, service.delete_event(&EventId(event_id)))
}

pub(crate) async fn archive_event_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = require_admin(&headers) {
        return rejection;
    }
    respond(StatusCode::OK, service.archive_event(&EventId(event_id)))
}

pub(crate) async fn join_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    let school_id = match require_school(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let form: ParticipationForm = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    respond(
        StatusCode::OK,
        service.join(&EventId(event_id), &school_id, &form, Utc::now()),
    )
}

pub(crate) async fn edit_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    let school_id = match require_school(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let form: ParticipationForm = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    respond(
        StatusCode::OK,
        service.edit(&EventId(event_id), &school_id, &form, Utc::now()),
    )
}

pub(crate) async fn withdraw_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    let school_id = match require_school(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    respond(
        StatusCode::OK,
        service.withdraw(&EventId(event_id), &school_id, Utc::now()),
    )
}

pub(crate) async fn manage_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = require_admin(&headers) {
        return rejection;
    }
    respond(StatusCode::OK, service.manage_view(&EventId(event_id)))
}

pub(crate) async fn approve_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    let admin = match require_admin(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let command: ApproveCommand = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    if let Some(action) = command.action.as_deref() {
        if !action.eq_ignore_ascii_case("approve") {
            let mut errors = ValidationErrors::new();
            errors.push("action", "must be \"approve\"");
            return error_response(errors.into());
        }
    }
    respond(
        StatusCode::OK,
        service.approve(&EventId(event_id), &command.request_ids, &admin, Utc::now()),
    )
}

pub(crate) async fn reject_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    let admin = match require_admin(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let command: RejectCommand = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    respond(
        StatusCode::OK,
        service.reject(
            &EventId(event_id),
            &command.request_ids,
            &command.reason,
            &admin,
            Utc::now(),
        ),
    )
}

pub(crate) async fn enroll_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    let admin = match require_admin(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let command: SelectionCommand = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    respond(
        StatusCode::OK,
        service.enroll(&EventId(event_id), &command.request_ids, &admin, Utc::now()),
    )
}

pub(crate) async fn force_enroll_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    let admin = match require_admin(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let form: ForceEnrollForm = match parse_body(&body) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    respond(
        StatusCode::OK,
        service.force_enroll(&EventId(event_id), &form, &admin, Utc::now()),
    )
}

pub(crate) async fn roster_csv_handler<R, D, N>(
    State(service): State<SharedService<R, D, N>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    if let Err(rejection) = require_admin(&headers) {
        return rejection;
    }
    match service.export_roster_csv(&EventId(event_id)) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}
