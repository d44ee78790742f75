use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// A JSON body and its status. Every route answers with one of these, errors
/// included, so clients never see a non-JSON body.
pub struct ApiResponse {
    pub body: Value,
    pub status: StatusCode,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            body,
            status: StatusCode::OK,
        }
    }

    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::error(StatusCode::NOT_FOUND, message.into())
    }

    pub fn bad_request<M: Into<String>>(message: M) -> Self {
        Self::error(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn internal(msg: &str) -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, msg.into())
    }

    fn error(status: StatusCode, message: String) -> Self {
        Self {
            body: json!({ "error": message }),
            status,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_constructor_answers_json() {
        let cases = [
            (ApiResponse::ok(json!({"code": 0})), StatusCode::OK, json!({"code": 0})),
            (ApiResponse::not_found("gone"), StatusCode::NOT_FOUND, json!({"error": "gone"})),
            (ApiResponse::bad_request("gpuid"), StatusCode::BAD_REQUEST, json!({"error": "gpuid"})),
            (ApiResponse::internal("db"), StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "db"})),
        ];
        for (response, status, body) in cases {
            let response = response.into_response();
            assert_eq!(response.status(), status);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body");
            assert_eq!(serde_json::from_slice::<Value>(&bytes).expect("json"), body);
        }
    }
}
