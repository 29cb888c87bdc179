//! Request handlers

use super::AppState;
use super::error::{ApiError, ApiResult};
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Redirect, Response};
use futures::{Stream, StreamExt};
use protocol::{Device, ImageInfo, TransferDirection, TransferRequest};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval of keep-alive comments on the event stream
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn index() -> Redirect {
    Redirect::to("/devices/")
}

pub async fn list_devices(State(state): State<AppState>) -> ApiResult<Json<Vec<Device>>> {
    Ok(Json(state.dfu.list_devices().await?))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> ApiResult<Json<Device>> {
    state
        .dfu
        .find_device(&serial)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("device {}", serial)))
}

pub async fn download(
    State(state): State<AppState>,
    Path(serial): Path<String>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<Response> {
    transfer(state, TransferDirection::Download, serial, request)
}

pub async fn upload(
    State(state): State<AppState>,
    Path(serial): Path<String>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<Response> {
    transfer(state, TransferDirection::Upload, serial, request)
}

/// Start a transfer and stream the tool's output lines as the body
///
/// Faults before the tool starts are answered with an error status. A fault
/// while streaming ends the body with an `ERROR:` line.
fn transfer(
    state: AppState,
    direction: TransferDirection,
    serial: String,
    request: TransferRequest,
) -> ApiResult<Response> {
    let file = state.images.resolve(&request.filename, direction)?;
    info!(
        "Starting {:?} of {} for device {} (alt {}, address {})",
        direction, request.filename, serial, request.alt, request.address
    );

    let output = state.dfu.transfer(direction, &file, &serial, &request)?;
    let body = output.into_stream().map(move |line| {
        Ok::<_, Infallible>(match line {
            Ok(line) => format!("{}\n", line),
            Err(e) => {
                warn!("Transfer for device {} failed: {}", serial, e);
                format!("ERROR: {}\n", e)
            }
        })
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

/// Server-sent hot-plug events
///
/// The subscription lives inside the response stream, so it is released as
/// soon as the client disconnects.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    debug!("Event stream opened with subscription {}", subscription.id());

    let stream = subscription.into_stream().filter_map(|event| async move {
        match Event::default().json_data(&event) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to encode hot-plug event: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

pub async fn list_images(State(state): State<AppState>) -> ApiResult<Json<Vec<ImageInfo>>> {
    Ok(Json(state.images.list().await?))
}
