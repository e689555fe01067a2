//! HTTP front end: the proxy that pages talk to, plus the worker control routes.

use axum::{
  body::{Body, Bytes},
  extract::{Path, Request as HttpRequest, State},
  http::StatusCode,
  response::{IntoResponse, Response as HttpResponse},
  routing::{get, post},
  Json, Router,
};
use serde_json::json;
use tracing::{debug, error};

use crate::cache::Served;
use crate::event::{EventOutcome, WorkerEvent};
use crate::net::{is_forwardable_header, Headers, Request, Response};
use crate::worker::{ClientMessage, NotificationClick, Worker};

/// Tells the page where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-offline-worker-source";

/// Largest request body the proxy buffers.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn build_router(worker: Worker) -> Router {
  Router::new()
    .route("/__worker/status", get(status))
    .route("/__worker/activate", post(activate))
    .route("/__worker/message", post(message))
    .route("/__worker/sync/:tag", post(sync))
    .route("/__worker/periodic-sync/:tag", post(periodic_sync))
    .route("/__worker/push", post(push))
    .route("/__worker/notification-click", post(notification_click))
    .fallback(proxy)
    .with_state(worker)
}

async fn status(State(worker): State<Worker>) -> HttpResponse {
  match worker.status() {
    Ok(status) => Json(status).into_response(),
    Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
  }
}

async fn activate(State(worker): State<Worker>) -> HttpResponse {
  outcome_response(worker.dispatch(WorkerEvent::Activate).await)
}

async fn message(State(worker): State<Worker>, Json(message): Json<ClientMessage>) -> HttpResponse {
  outcome_response(worker.dispatch(WorkerEvent::Message(message)).await)
}

async fn sync(State(worker): State<Worker>, Path(tag): Path<String>) -> HttpResponse {
  outcome_response(worker.dispatch(WorkerEvent::Sync { tag }).await)
}

async fn periodic_sync(State(worker): State<Worker>, Path(tag): Path<String>) -> HttpResponse {
  outcome_response(worker.dispatch(WorkerEvent::PeriodicSync { tag }).await)
}

async fn push(State(worker): State<Worker>, body: Bytes) -> HttpResponse {
  let data = (!body.is_empty()).then_some(body);
  outcome_response(worker.dispatch(WorkerEvent::Push(data)).await)
}

async fn notification_click(
  State(worker): State<Worker>,
  Json(click): Json<NotificationClick>,
) -> HttpResponse {
  outcome_response(worker.dispatch(WorkerEvent::NotificationClick(click)).await)
}

/// Every other request: route through the worker, or forward it.
async fn proxy(State(worker): State<Worker>, request: HttpRequest) -> HttpResponse {
  let request = match to_worker_request(&worker, request).await {
    Ok(request) => request,
    Err(response) => return response,
  };

  // Spawned so a client hanging up does not cancel the fetch or its cache write
  let task = tokio::spawn(async move {
    match worker.dispatch(WorkerEvent::Fetch(request)).await {
      EventOutcome::Respond(served) => served,
      EventOutcome::PassThrough(request) => worker.forward(request).await,
      other => {
        error!("Unexpected fetch outcome: {:?}", other);
        Served::synthetic(Response::new(500, "Internal error"))
      }
    }
  });

  match task.await {
    Ok(served) => served_response(served),
    Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
  }
}

async fn to_worker_request(worker: &Worker, request: HttpRequest) -> Result<Request, HttpResponse> {
  let (parts, body) = request.into_parts();

  let path = parts
    .uri
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/");
  let url = worker
    .origin()
    .join(path)
    .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("Invalid path: {}", e)))?;

  let headers: Headers = parts
    .headers
    .iter()
    .filter(|(name, _)| is_forwardable_header(name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| error_response(StatusCode::PAYLOAD_TOO_LARGE, &e.to_string()))?;

  debug!("{} {}", parts.method, url);
  Ok(Request {
    method: parts.method,
    url,
    headers,
    body: (!body.is_empty()).then_some(body),
  })
}

fn served_response(served: Served) -> HttpResponse {
  let mut builder = axum::http::Response::builder().status(served.response.status);
  for (name, value) in &served.response.headers {
    builder = builder.header(name.as_str(), value.as_str());
  }

  builder
    .header(SOURCE_HEADER, served.source.as_str())
    .body(Body::from(served.response.body))
    .unwrap_or_else(|e| error_response(StatusCode::BAD_GATEWAY, &e.to_string()))
}

fn outcome_response(outcome: EventOutcome) -> HttpResponse {
  match outcome {
    EventOutcome::Completed | EventOutcome::Reply(None) => StatusCode::NO_CONTENT.into_response(),
    EventOutcome::Reply(Some(reply)) => Json(reply).into_response(),
    EventOutcome::Synced(report) => Json(report).into_response(),
    EventOutcome::Notified(intent) => Json(intent).into_response(),
    EventOutcome::Clicked(outcome) => Json(outcome).into_response(),
    EventOutcome::Ignored => error_response(StatusCode::NOT_FOUND, "No handler for this tag"),
    EventOutcome::Failed(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &message),
    EventOutcome::Respond(served) => served_response(served),
    EventOutcome::PassThrough(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "Not a fetch"),
  }
}

fn error_response(status: StatusCode, message: &str) -> HttpResponse {
  (status, Json(json!({ "error": message }))).into_response()
}
