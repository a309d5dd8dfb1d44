// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/server.rs - HTTP 服务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Json, Router,
  body::Bytes,
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
  http::StatusCode,
  response::{Html, IntoResponse},
  routing::{get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, warn};

use crate::{
  input::OpenVideo,
  model::Classifier,
  task::{NO_FILE_UPLOADED, Pipeline, Response},
};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;
pub const UPLOAD_FIELD: &str = "file";

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// HTTP 层配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub static_dir: PathBuf,
  pub max_upload_bytes: usize,
  pub request_timeout: Option<Duration>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      static_dir: PathBuf::from("static"),
      max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
      request_timeout: None,
    }
  }
}

pub struct AppState<C, O> {
  pipeline: Arc<Pipeline<C, O>>,
  request_timeout: Option<Duration>,
}

impl<C, O> Clone for AppState<C, O> {
  fn clone(&self) -> Self {
    Self {
      pipeline: Arc::clone(&self.pipeline),
      request_timeout: self.request_timeout,
    }
  }
}

impl IntoResponse for Response {
  fn into_response(self) -> axum::response::Response {
    let status =
      StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(self)).into_response()
  }
}

/// 构建路由：`/` 上传页面，`/predict` 识别接口，`/static` 预览文件
pub fn router<C, O>(pipeline: Pipeline<C, O>, config: &ServerConfig) -> Router
where
  C: Classifier + 'static,
  O: OpenVideo + Send + Sync + 'static,
{
  let state = AppState {
    pipeline: Arc::new(pipeline),
    request_timeout: config.request_timeout,
  };

  Router::new()
    .route("/", get(index))
    .route("/predict", post(predict::<C, O>))
    .nest_service("/static", ServeDir::new(&config.static_dir))
    .layer(DefaultBodyLimit::max(config.max_upload_bytes))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn index() -> Html<&'static str> {
  Html(INDEX_HTML)
}

async fn predict<C, O>(
  State(state): State<AppState<C, O>>,
  multipart: Result<Multipart, MultipartRejection>,
) -> axum::response::Response
where
  C: Classifier + 'static,
  O: OpenVideo + Send + Sync + 'static,
{
  let mut multipart = match multipart {
    Ok(multipart) => multipart,
    Err(rejection) => {
      warn!("请求不是 multipart 表单: {}", rejection.body_text());
      return Response::client_error(NO_FILE_UPLOADED).into_response();
    }
  };

  let upload = match read_upload(&mut multipart).await {
    Ok(upload) => upload,
    Err((status, message)) => {
      warn!("读取上传失败: {}", message);
      return (status, Json(Response::client_error(message))).into_response();
    }
  };

  let pipeline = Arc::clone(&state.pipeline);
  let task = tokio::task::spawn_blocking(move || pipeline.handle(upload.as_deref()));

  let joined = match state.request_timeout {
    Some(limit) => match tokio::time::timeout(limit, task).await {
      Ok(joined) => joined,
      Err(_) => {
        error!("请求处理超时 ({:?})", limit);
        return Response::server_error("request timed out").into_response();
      }
    },
    None => task.await,
  };

  match joined {
    Ok(response) => response.into_response(),
    Err(e) => {
      error!("识别任务异常退出: {}", e);
      Response::server_error(e.to_string()).into_response()
    }
  }
}

/// 取出名为 `file` 的字段，其余字段忽略
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Bytes>, (StatusCode, String)> {
  let mut upload = None;
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| (e.status(), e.body_text()))?
  {
    if field.name() != Some(UPLOAD_FIELD) {
      debug!("忽略表单字段: {:?}", field.name());
      continue;
    }
    let bytes = field.bytes().await.map_err(|e| (e.status(), e.body_text()))?;
    debug!("收到上传: {} 字节", bytes.len());
    if upload.is_none() {
      upload = Some(bytes);
    }
  }
  Ok(upload)
}

#[cfg(test)]
mod tests {
  use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
  };

  use axum::{body::Body, http::Request};
  use serde_json::Value;
  use thiserror::Error;
  use tower::ServiceExt;

  use super::*;
  use crate::{
    frame::FrameBatch,
    input::{DecodedFrame, PixelOrder},
    labels::LabelVocabulary,
    output::PreviewSink,
  };

  const BOUNDARY: &str = "dongzuo-test-boundary";

  #[derive(Error, Debug)]
  #[error("{0}")]
  struct StubError(String);

  /// 上传内容的第一个字节是帧数
  struct ByteCountOpener;

  impl OpenVideo for ByteCountOpener {
    type Error = StubError;
    type Source = std::vec::IntoIter<Result<DecodedFrame, StubError>>;

    fn open(&self, path: &Path) -> Result<Self::Source, Self::Error> {
      let bytes = std::fs::read(path).map_err(|e| StubError(e.to_string()))?;
      let count = bytes.first().copied().unwrap_or(0) as usize;
      let frames = (0..count)
        .map(|i| {
          DecodedFrame::new(32, 24, PixelOrder::Bgr, vec![(i * 9) as u8; 32 * 24 * 3])
            .map_err(|e| StubError(e.to_string()))
        })
        .collect::<Vec<_>>();
      Ok(frames.into_iter())
    }
  }

  struct StubClassifier {
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
  }

  impl StubClassifier {
    fn new() -> Self {
      Self {
        fail: false,
        delay: None,
        calls: AtomicUsize::new(0),
      }
    }
  }

  impl Classifier for StubClassifier {
    type Error = StubError;

    fn infer(&self, batch: &FrameBatch<'_>) -> Result<Vec<f32>, Self::Error> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(delay) = self.delay {
        std::thread::sleep(delay);
      }
      if self.fail {
        return Err(StubError(format!("unexpected input shape {:?}", batch.shape())));
      }
      Ok((0..8).map(|i| i as f32).collect())
    }
  }

  fn app(classifier: StubClassifier, static_dir: &Path, timeout: Option<Duration>) -> Router {
    let vocabulary =
      LabelVocabulary::new((0..8).map(|i| format!("action {}", i)).collect()).unwrap();
    let pipeline = Pipeline::new(
      classifier,
      Arc::new(vocabulary),
      ByteCountOpener,
      PreviewSink::fixed(static_dir),
    );
    let config = ServerConfig {
      static_dir: static_dir.to_path_buf(),
      request_timeout: timeout,
      ..ServerConfig::default()
    };
    router(pipeline, &config)
  }

  fn multipart_request(field: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
      format!(
        "Content-Disposition: form-data; name=\"{}\"; filename=\"clip.mp4\"\r\n",
        field
      )
      .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: video/mp4\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
      .method("POST")
      .uri("/predict")
      .header(
        "content-type",
        format!("multipart/form-data; boundary={}", BOUNDARY),
      )
      .body(Body::from(body))
      .unwrap()
  }

  async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn index_serves_the_upload_page() {
    let dir = tempfile::tempdir().unwrap();
    let response = app(StubClassifier::new(), dir.path(), None)
      .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    let page = String::from_utf8_lossy(&bytes);
    assert!(page.contains("/predict"));
    assert!(page.contains("id=\"file-name\""));
    assert!(page.contains("showActionInfo"));
  }

  #[tokio::test]
  async fn predict_returns_top_five_and_preview() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(StubClassifier::new(), dir.path(), None);

    let response = app
      .clone()
      .oneshot(multipart_request("file", &[3, 0, 0, 0]))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 5);
    assert_eq!(predictions[0]["action"], "action 7");
    assert_eq!(body["gif_path"], "./static/generated_gif.gif");
    assert!(dir.path().join("generated_gif.gif").exists());

    let preview = app
      .oneshot(
        Request::builder()
          .uri("/static/generated_gif.gif")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(preview.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn missing_file_field_is_a_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let response = app(StubClassifier::new(), dir.path(), None)
      .oneshot(multipart_request("video", &[3]))
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      json_body(response).await,
      serde_json::json!({"error": "No file uploaded"})
    );
  }

  #[tokio::test]
  async fn non_multipart_body_is_a_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let request = Request::builder()
      .method("POST")
      .uri("/predict")
      .header("content-type", "application/json")
      .body(Body::from("{}"))
      .unwrap();
    let response = app(StubClassifier::new(), dir.path(), None)
      .oneshot(request)
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No file uploaded");
  }

  #[tokio::test]
  async fn classifier_failure_is_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = StubClassifier {
      fail: true,
      ..StubClassifier::new()
    };
    let response = app(classifier, dir.path(), None)
      .oneshot(multipart_request("file", &[2]))
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
      json_body(response).await["error"],
      "unexpected input shape [1, 2, 224, 224, 3]"
    );
  }

  #[tokio::test]
  async fn slow_requests_time_out() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = StubClassifier {
      fail: true,
      delay: Some(Duration::from_millis(500)),
      ..StubClassifier::new()
    };
    let response = app(classifier, dir.path(), Some(Duration::from_millis(20)))
      .oneshot(multipart_request("file", &[1]))
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "request timed out");
  }
}
