use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Json, Multipart, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use caption_core::{
    generate_caption, CaptionError, Loader, ModelLoadError, ModelProvider, UploadedImage,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Largest request body accepted on any route.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Multipart field carrying the uploaded file.
pub const IMAGE_FIELD: &str = "image";

#[derive(Serialize)]
struct CaptionResponse {
    caption: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Caption(CaptionError),
    Upload(MultipartError),
}

impl From<CaptionError> for ApiError {
    fn from(err: CaptionError) -> Self {
        Self::Caption(err)
    }
}

impl From<ModelLoadError> for ApiError {
    fn from(err: ModelLoadError) -> Self {
        Self::Caption(err.into())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::Upload(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Caption(err) if err.is_client_error() => {
                debug!("rejected caption request: {err}");
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Self::Caption(err) => {
                error!("error generating caption: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::Upload(err) => {
                debug!("failed to read upload: {err}");
                (err.status(), err.body_text())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub fn router<L: Loader>(provider: Arc<ModelProvider<L>>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/static/js/script.js", get(script))
        .route("/caption", post(caption_handler::<L>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(provider)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        include_str!("../static/js/script.js"),
    )
}

async fn caption_handler<L: Loader>(
    State(provider): State<Arc<ModelProvider<L>>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CaptionResponse>, ApiError> {
    let upload = read_upload(multipart).await?;
    let image = upload.decode()?;

    let bundle = provider.get_bundle().await?;
    let caption = tokio::task::spawn_blocking(move || generate_caption(&bundle, &image))
        .await
        .map_err(CaptionError::inference)??;

    Ok(Json(CaptionResponse { caption }))
}

/// Pulls the `image` file field out of the form. Fields without a filename are not
/// file uploads and are skipped like any other field.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadedImage, ApiError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!("request is not a multipart upload: {rejection}");
            return Err(CaptionError::MissingImage.into());
        }
    };

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if filename.is_empty() {
            return Err(CaptionError::EmptySelection.into());
        }
        let bytes = field.bytes().await?;
        debug!(%filename, size = bytes.len(), "received upload");
        return Ok(UploadedImage::new(filename, bytes.to_vec()));
    }

    Err(CaptionError::MissingImage.into())
}
