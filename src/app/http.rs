use std::io::SeekFrom;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};
use tokio_util::io::ReaderStream;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::app::library::PackageFormat;
use crate::app::service::{JobService, NovelSubmission, SubmitError};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/extract", post(extract_handler))
        .route("/novel", post(novel_handler))
        .route("/tts/chapter/:chapter_id", post(tts_chapter_handler))
        .route("/tts/novel/:novel_id", post(tts_novel_handler))
        .route("/jobs/:job_id", get(job_handler))
        .route("/catalog/:novel_id", get(catalog_handler))
        .route("/search", get(search_handler))
        .route("/media/audio/:chapter_id", get(audio_handler))
        .route("/download/:file", get(download_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn submit_error(err: SubmitError) -> (StatusCode, String) {
    let status = match &err {
        SubmitError::InvalidUrl(_) | SubmitError::UnknownProvider(_) => StatusCode::BAD_REQUEST,
        SubmitError::DuplicateSource { .. } => StatusCode::CONFLICT,
        SubmitError::NotFound(_) => StatusCode::NOT_FOUND,
        SubmitError::Internal(inner) => {
            tracing::error!(err = ?inner, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, format!("{err:#}"))
}

fn internal(err: anyhow::Error) -> (StatusCode, String) {
    submit_error(SubmitError::Internal(err))
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    #[serde(default)]
    url: String,
}

async fn extract_handler(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.url.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "url is required".to_string()));
    }
    let chapter = state
        .service
        .extract_single(&req.url)
        .await
        .map_err(submit_error)?;
    Ok(Json(chapter))
}

async fn novel_handler(
    State(state): State<AppState>,
    Json(req): Json<NovelSubmission>,
) -> ApiResult<impl IntoResponse> {
    if req.url.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "url is required".to_string()));
    }
    let submitted = state
        .service
        .submit_extraction(req)
        .await
        .map_err(submit_error)?;
    Ok(Json(submitted))
}

#[derive(Debug, Default, Deserialize)]
struct SynthesisRequest {
    provider: Option<String>,
}

/// The body is optional; anything that is not a JSON object with a
/// `provider` string means the default provider.
fn synthesis_request(body: &Bytes) -> SynthesisRequest {
    serde_json::from_slice(body).unwrap_or_default()
}

async fn tts_chapter_handler(
    State(state): State<AppState>,
    Path(chapter_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req = synthesis_request(&body);
    let job_id = state
        .service
        .submit_chapter_synthesis(&chapter_id, req.provider.as_deref())
        .await
        .map_err(submit_error)?;
    Ok(Json(json!({ "job_id": job_id })))
}

async fn tts_novel_handler(
    State(state): State<AppState>,
    Path(novel_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req = synthesis_request(&body);
    let job_id = state
        .service
        .submit_novel_synthesis(&novel_id, req.provider.as_deref())
        .await
        .map_err(submit_error)?;
    Ok(Json(json!({ "job_id": job_id })))
}

async fn job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let Some(job) = state
        .service
        .runner()
        .store()
        .get_job(&job_id)
        .await
        .map_err(internal)?
    else {
        return Err((StatusCode::NOT_FOUND, format!("job not found: {job_id}")));
    };
    Ok(Json(job))
}

async fn catalog_handler(
    State(state): State<AppState>,
    Path(novel_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let store = state.service.runner().store();
    let Some(novel) = store.get_novel(&novel_id).await.map_err(internal)? else {
        return Err((StatusCode::NOT_FOUND, format!("novel not found: {novel_id}")));
    };
    let chapters = store.get_chapters(&novel_id).await.map_err(internal)?;
    Ok(Json(json!({ "novel": novel, "chapters": chapters })))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    audio: Option<bool>,
}

async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let runner = state.service.runner();
    let ids = runner
        .search()
        .search_novels(query.q.as_deref().unwrap_or_default(), query.audio)
        .await
        .map_err(internal)?;

    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(novel) = runner.store().get_novel(&id).await.map_err(internal)? {
            results.push(novel);
        }
    }
    Ok(Json(json!({ "results": results })))
}

/// Inclusive byte range for a `Range: bytes=a-b` header against a file of
/// `size` bytes. Missing bounds mean the file edge, an end past the file is
/// clamped, and an inverted range selects the whole file. `None` when the
/// header is not a byte range.
pub fn parse_byte_range(raw: &str, size: u64) -> Option<(u64, u64)> {
    let ranges = raw.trim().strip_prefix("bytes=")?;
    let (start, end) = ranges.split_once('-')?;
    let bound = |s: &str| -> Option<Option<u64>> {
        let s = s.trim();
        if s.is_empty() {
            Some(None)
        } else {
            s.parse::<u64>().ok().map(Some)
        }
    };
    let last = size.checked_sub(1)?;
    let start = bound(start)?.unwrap_or(0);
    let end = bound(end)?.unwrap_or(last).min(last);
    if start > end {
        return Some((0, last));
    }
    Some((start, end))
}

async fn audio_handler(
    State(state): State<AppState>,
    Path(chapter_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let Some(chapter) = state
        .service
        .runner()
        .store()
        .get_chapter(&chapter_id)
        .await
        .map_err(internal)?
    else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("chapter not found: {chapter_id}"),
        ));
    };
    let not_generated = || {
        (
            StatusCode::NOT_FOUND,
            format!("audio not generated for chapter: {chapter_id}"),
        )
    };
    let Some(audio) = chapter.audio else {
        return Err(not_generated());
    };

    let mut file = tokio::fs::File::open(&audio.path)
        .await
        .map_err(|_| not_generated())?;
    let size = file
        .metadata()
        .await
        .map_err(|err| internal(err.into()))?
        .len();

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| parse_byte_range(raw, size));

    let mut resp = match range {
        Some((start, end)) => {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|err| internal(err.into()))?;
            let len = end - start + 1;
            let body = Body::from_stream(ReaderStream::new(file.take(len)));
            let mut resp = Response::new(body);
            *resp.status_mut() = StatusCode::PARTIAL_CONTENT;
            resp.headers_mut().insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
                    .map_err(|err| internal(err.into()))?,
            );
            resp.headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            resp
        }
        None => {
            let mut resp = Response::new(Body::from_stream(ReaderStream::new(file)));
            resp.headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            resp
        }
    };
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    resp.headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(resp)
}

async fn download_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> ApiResult<Response> {
    let Some((novel_id, ext)) = file.rsplit_once('.') else {
        return Err((StatusCode::BAD_REQUEST, "unsupported format".to_string()));
    };
    let Some(format) = PackageFormat::parse(ext) else {
        return Err((StatusCode::BAD_REQUEST, "unsupported format".to_string()));
    };

    let path = state
        .service
        .ensure_package(novel_id, format)
        .await
        .map_err(submit_error)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{novel_id}.{}", format.extension()));

    let handle = tokio::fs::File::open(&path)
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, format!("package not found: {file_name}")))?;
    let mut resp = Response::new(Body::from_stream(ReaderStream::new(handle)));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    resp.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
            .map_err(|err| internal(err.into()))?,
    );
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_bounds() {
        assert_eq!(parse_byte_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_byte_range("bytes=500-", 1000), Some((500, 999)));
        assert_eq!(parse_byte_range("bytes=-200", 1000), Some((0, 200)));
        assert_eq!(parse_byte_range("bytes=900-5000", 1000), Some((900, 999)));
        assert_eq!(parse_byte_range("bytes=800-100", 1000), Some((0, 999)));
        assert_eq!(parse_byte_range("bytes=5000-", 1000), Some((0, 999)));
    }

    #[test]
    fn non_byte_ranges_are_ignored() {
        assert_eq!(parse_byte_range("items=0-1", 1000), None);
        assert_eq!(parse_byte_range("bytes=a-b", 1000), None);
        assert_eq!(parse_byte_range("bytes=0-1", 0), None);
    }

    #[test]
    fn optional_synthesis_body() {
        assert_eq!(synthesis_request(&Bytes::new()).provider, None);
        assert_eq!(synthesis_request(&Bytes::from_static(b"not json")).provider, None);
        assert_eq!(
            synthesis_request(&Bytes::from_static(br#"{"provider":"openai"}"#))
                .provider
                .as_deref(),
            Some("openai")
        );
    }
}
