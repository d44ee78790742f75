use crate::libs::api_response::ApiResponse;
use axum::extract::Path;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "views/"]
#[include = "*.html"]
#[include = "*.js"]
#[include = "*.css"]
struct DashboardAsset;

pub fn routes() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index", get(index))
        .route("/static/{file}", get(asset))
}

async fn index() -> Response {
    serve("index.html")
}

async fn asset(Path(file): Path<String>) -> Response {
    serve(&file)
}

fn serve(file: &str) -> Response {
    let Some(content) = DashboardAsset::get(file) else {
        return ApiResponse::not_found(format!("{file} not found")).into_response();
    };
    let mime = match file.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        _ => "application/octet-stream",
    };
    ([(header::CONTENT_TYPE, mime)], content.data).into_response()
}
