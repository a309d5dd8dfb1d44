// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/task.rs - 单次识别请求的编排
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

use std::{
  any::Any,
  io::Write,
  panic::{self, AssertUnwindSafe},
  path::{Path, PathBuf},
  sync::Arc,
  time::Instant,
};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::I3D_INPUT_SIZE,
  input::OpenVideo,
  labels::LabelVocabulary,
  model::Classifier,
  output::{GifPreviewOutput, PreviewError, PreviewSink},
  ranker::{self, ClassificationError, Prediction},
  sampler::{FrameSampler, SamplerError},
};

pub const NO_FILE_UPLOADED: &str = "No file uploaded";
const STAGED_SUFFIX: &str = ".mp4";

/// 一次请求的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
  Success {
    predictions: Vec<Prediction>,
    gif_path: String,
  },
  ClientError {
    error: String,
  },
  ServerError {
    error: String,
  },
}

impl Response {
  pub fn client_error(message: impl Into<String>) -> Self {
    Response::ClientError {
      error: message.into(),
    }
  }

  pub fn server_error(message: impl Into<String>) -> Self {
    Response::ServerError {
      error: message.into(),
    }
  }

  pub fn status_code(&self) -> u16 {
    match self {
      Response::Success { .. } => 200,
      Response::ClientError { .. } => 400,
      Response::ServerError { .. } => 500,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Response::Success { .. })
  }
}

#[derive(Error, Debug)]
pub enum StageError {
  #[error("failed to stage upload: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error(transparent)]
  Classification(#[from] ClassificationError),
  #[error(transparent)]
  Preview(#[from] PreviewError),
}

/// 上传视频的临时文件，在离开作用域时删除且只删除一次
pub struct StagedVideo {
  path: PathBuf,
  file: Option<NamedTempFile>,
}

impl StagedVideo {
  pub fn stage(bytes: &[u8], directory: Option<&Path>) -> Result<Self, StageError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("upload-").suffix(STAGED_SUFFIX);
    let mut file = match directory {
      Some(directory) => builder.tempfile_in(directory)?,
      None => builder.tempfile()?,
    };
    file.write_all(bytes)?;
    file.flush()?;

    let path = file.path().to_path_buf();
    debug!("上传已暂存: {} ({} 字节)", path.display(), bytes.len());
    Ok(Self {
      path,
      file: Some(file),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 删除失败只记录警告，不影响请求结果
  pub fn release(&mut self) {
    if let Some(file) = self.file.take() {
      match file.close() {
        Ok(()) => debug!("临时文件已删除: {}", self.path.display()),
        Err(e) => warn!("删除临时文件 {} 失败: {}", self.path.display(), e),
      }
    }
  }
}

impl Drop for StagedVideo {
  fn drop(&mut self) {
    self.release();
  }
}

/// 识别流水线：暂存上传 → 采样 → 推理排序 → 生成预览
///
/// 标签表与分类器在进程启动时构建一次，以只读方式注入。
pub struct Pipeline<C, O> {
  sampler: FrameSampler<I3D_INPUT_SIZE, I3D_INPUT_SIZE>,
  classifier: C,
  vocabulary: Arc<LabelVocabulary>,
  opener: O,
  preview: GifPreviewOutput,
  sink: PreviewSink,
  staging_dir: Option<PathBuf>,
}

impl<C: Classifier, O: OpenVideo> Pipeline<C, O> {
  pub fn new(classifier: C, vocabulary: Arc<LabelVocabulary>, opener: O, sink: PreviewSink) -> Self {
    Self {
      sampler: FrameSampler::default(),
      classifier,
      vocabulary,
      opener,
      preview: GifPreviewOutput::default(),
      sink,
      staging_dir: None,
    }
  }

  pub fn with_max_frames(mut self, max_frames: usize) -> Result<Self, SamplerError> {
    self.sampler = FrameSampler::new(max_frames)?;
    Ok(self)
  }

  pub fn with_preview(mut self, preview: GifPreviewOutput) -> Self {
    self.preview = preview;
    self
  }

  pub fn with_staging_dir(mut self, directory: impl Into<PathBuf>) -> Self {
    self.staging_dir = Some(directory.into());
    self
  }

  /// 处理一次上传，所有路径都以一个 [`Response`] 结束
  pub fn handle(&self, upload: Option<&[u8]>) -> Response {
    let Some(bytes) = upload else {
      warn!("请求中没有上传文件");
      return Response::client_error(NO_FILE_UPLOADED);
    };

    let now = Instant::now();
    let mut staged = match StagedVideo::stage(bytes, self.staging_dir.as_deref()) {
      Ok(staged) => staged,
      Err(e) => {
        error!("暂存上传失败: {}", e);
        return Response::server_error(e.to_string());
      }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_stages(staged.path())));
    staged.release();

    let response = match outcome {
      Ok(Ok((predictions, gif_path))) => Response::Success {
        predictions,
        gif_path,
      },
      Ok(Err(e)) => {
        error!("识别失败: {}", e);
        Response::server_error(e.to_string())
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!("识别过程中发生意外错误: {}", message);
        Response::server_error(message)
      }
    };

    info!(
      "请求处理完成，状态 {}，耗时: {:.2?}",
      response.status_code(),
      now.elapsed()
    );
    response
  }

  fn run_stages(&self, path: &Path) -> Result<(Vec<Prediction>, String), PipelineError> {
    let frames = self.sampler.sample_path(&self.opener, path);
    info!("采样到 {} 帧，开始推理...", frames.len());

    let predictions = ranker::rank(&frames, &self.classifier, &self.vocabulary)?;
    if let Some(top) = predictions.first() {
      info!("推理完成，最可能的动作: {} ({:.2}%)", top.action, top.probability);
    }

    let artifact = self.sink.allocate();
    self.preview.encode(&frames, &artifact.file_path)?;

    Ok((predictions, artifact.public_path))
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unexpected failure while processing the video".to_string()
  }
}
