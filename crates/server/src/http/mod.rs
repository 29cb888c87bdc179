//! HTTP boundary
//!
//! A thin axum adapter over the device operations: enumeration, firmware
//! transfers streamed line by line, image listing, and hot-plug
//! notifications as server-sent events.

pub mod error;
pub mod routes;

use crate::dfu::DfuUtil;
use crate::images::ImageStore;
use crate::usb::Broadcaster;
use axum::Router;
use axum::routing::{get, post};

pub use error::{ApiError, ApiResult};

/// Shared handler state; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub dfu: DfuUtil,
    pub images: ImageStore,
    pub broadcaster: Broadcaster,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/devices/", get(routes::list_devices))
        .route("/devices/{serial}", get(routes::get_device))
        .route("/devices/{serial}/download", post(routes::download))
        .route("/devices/{serial}/upload", post(routes::upload))
        .route("/events", get(routes::events))
        .route("/images/", get(routes::list_images))
        .with_state(state)
}
