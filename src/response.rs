use actix_web::{error::JsonPayloadError, HttpRequest, HttpResponse, ResponseError};
use serde_json::json;

use crate::error::AppError;

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let app_err = match err {
        JsonPayloadError::ContentType => AppError::bad_request("Unsupported content type"),
        _ => AppError::bad_request("Malformed request payload"),
    };
    app_err.into()
}

pub fn response_from_error(err: &AppError) -> HttpResponse {
    let body = match err {
        // Django-serializer style: the field map is the whole body
        AppError::Validation(errors) => json!(errors),
        AppError::DetailBadRequest(msg)
        | AppError::DetailNotFound(msg)
        | AppError::Unauthorized(msg)
        | AppError::Forbidden(msg) => json!({ "detail": msg }),
        AppError::EmailNotVerified => json!({ "detail": err.to_string() }),
        _ => json!({ "error": err.to_string() }),
    };
    HttpResponse::build(err.status_code()).json(body)
}
