use crate::libs::shared_state::SharedState;
use crate::prelude::Res;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum_helmet::{Helmet, HelmetLayer};
use serde_json::json;
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::{BoxError, ServiceBuilder};
use tower_http::cors::{Any as AnyOrigin, CorsLayer};

pub mod components;
const T_OUT: Duration = Duration::from_secs(30);

/// Serves the api until `shutdown` resolves, then lets in-flight requests finish.
pub async fn run<F>(state: SharedState, shutdown: F) -> Res
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state.clone());

    let addr = format!("{}:{}", state.app_config.host, state.app_config.port);
    log::info!("api is running on {addr}");
    let socket = TcpListener::bind(addr).await?;
    axum::serve(socket, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn router(state: SharedState) -> Router {
    let helmet = build_helmet();

    components::routes(state).layer(
        ServiceBuilder::new() //executes from top to bottom
            .layer(axum::error_handling::HandleErrorLayer::new(unhandled_err))
            .layer(tower_http::catch_panic::CatchPanicLayer::custom(panicked))
            .layer(tower_http::timeout::TimeoutLayer::new(T_OUT))
            .layer(HelmetLayer::new(helmet))
            .layer(cors())
            .layer(tower::buffer::BufferLayer::new(2048)),
    )
}

fn build_helmet() -> Helmet {
    Helmet::new()
        .add(axum_helmet::XContentTypeOptions::nosniff())
        .add(axum_helmet::ReferrerPolicy::StrictOriginWhenCrossOrigin)
        .add(axum_helmet::XFrameOptions::SameOrigin) // deprecated
        .add(axum_helmet::XDownloadOptions::NoOpen)
        .add(
            axum_helmet::ContentSecurityPolicy::new()
                //disable iframe or cross-content
                .frame_src(vec!["'none'"])
                .frame_ancestors(vec!["'none'"])
                .default_src(vec!["'self'"]),
        )
}

async fn unhandled_err(e: BoxError) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("Unhandled error: {e}") })),
    )
}

fn panicked(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    log::error!("request handler panicked: {detail}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}

// peers and dashboards on other origins read the api
#[inline]
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_headers(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_origin(AnyOrigin)
        .allow_private_network(true)
}
