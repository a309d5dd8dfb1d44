// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/model/tract_classifier.rs - 基于 tract 的 ONNX 动作分类模型
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

use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::FrameBatch, model::Classifier};

#[derive(Error, Debug)]
pub enum TractClassifierError {
  #[error("failed to read model file: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("invalid model {0}: {1}")]
  ModelInvalid(String, String),
  #[error("model path error: {0}")]
  ModelPathError(String),
  #[error("inference failed: {0}")]
  InferenceError(String),
  #[error("model produced no output")]
  NoOutput,
}

/// ONNX 格式的动作识别模型（例如 I3D Kinetics-400 导出）
///
/// 运行计划构建后只读，`run` 的中间状态在每次调用内部创建。
pub struct TractClassifier {
  model: TypedRunnableModel<TypedModel>,
}

pub struct TractClassifierBuilder {
  model_path: String,
}

impl FromUrlWithScheme for TractClassifierBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractClassifierBuilder {
  type Error = TractClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TractClassifierError::ModelPathError(format!(
        "model url must use the '{}' scheme, got '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(TractClassifierBuilder {
      model_path: url.path().to_string(),
    })
  }
}

impl TractClassifierBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
    }
  }

  pub fn build(self) -> Result<TractClassifier, TractClassifierError> {
    info!("加载模型文件: {}", self.model_path);
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| TractClassifierError::ModelInvalid(self.model_path.clone(), format!("{:#}", e)))?;
    info!("模型加载完成");

    Ok(TractClassifier { model })
  }
}

impl Classifier for TractClassifier {
  type Error = TractClassifierError;

  fn infer(&self, batch: &FrameBatch<'_>) -> Result<Vec<f32>, Self::Error> {
    let shape = batch.shape();
    debug!("设置模型输入: {:?}", shape);
    let input = Tensor::from_shape(&shape, batch.data())
      .map_err(|e| TractClassifierError::InferenceError(format!("{:#}", e)))?;

    debug!("执行模型推理");
    let outputs = self
      .model
      .run(tvec!(input.into_tvalue()))
      .map_err(|e| TractClassifierError::InferenceError(format!("{:#}", e)))?;

    let logits = outputs
      .first()
      .ok_or(TractClassifierError::NoOutput)?
      .to_array_view::<f32>()
      .map_err(|e| TractClassifierError::InferenceError(format!("{:#}", e)))?;
    debug!("模型输出形状: {:?}", logits.shape());

    Ok(logits.iter().copied().collect())
  }
}
