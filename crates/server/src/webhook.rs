use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use prcard_core::errors::{ApplicationError, InterfaceError};
use prcard_relay::{Acceptance, WebhookDelivery, WebhookDispatcher};
use serde::Serialize;
use uuid::Uuid;

pub const EVENT_KEY_HEADER: &str = "x-event-key";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";
pub const REQUEST_UUID_HEADER: &str = "x-request-uuid";

#[derive(Clone)]
pub struct WebhookState {
    dispatcher: WebhookDispatcher,
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    status: &'static str,
    correlation_id: String,
}

#[derive(Debug, Serialize)]
struct WebhookErrorBody {
    error: &'static str,
    correlation_id: String,
}

pub fn router(dispatcher: WebhookDispatcher) -> Router {
    Router::new()
        .route("/bitbucket/webhook", post(receive))
        .with_state(WebhookState { dispatcher })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = header_value(&headers, REQUEST_UUID_HEADER)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let delivery = WebhookDelivery {
        event_key: header_value(&headers, EVENT_KEY_HEADER).unwrap_or_default(),
        body: body.to_vec(),
        signature: header_value(&headers, SIGNATURE_HEADER),
        correlation_id: correlation_id.clone(),
    };

    match state.dispatcher.handle(delivery).await {
        Ok(acceptance) => {
            let status = match acceptance {
                Acceptance::Dropped => "ignored",
                Acceptance::Scheduled(_) => "accepted",
            };
            (StatusCode::OK, Json(WebhookAck { status, correlation_id })).into_response()
        }
        Err(rejection) => {
            let error = ApplicationError::from(rejection).into_interface(correlation_id);
            (
                status_code(&error),
                Json(WebhookErrorBody {
                    error: error.user_message(),
                    correlation_id: error.correlation_id().to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn status_code(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
