// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/model.rs - 分类模型
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

use std::sync::Arc;

use crate::frame::FrameBatch;

/// 动作分类能力
///
/// 输入形状为 `[1, T, H, W, 3]`、取值 [0, 1] 的帧张量，输出与标签表
/// 等长的 logits。实现需要支持多个请求并发调用。
pub trait Classifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, batch: &FrameBatch<'_>) -> Result<Vec<f32>, Self::Error>;
}

impl<C: Classifier + ?Sized> Classifier for Arc<C> {
  type Error = C::Error;

  fn infer(&self, batch: &FrameBatch<'_>) -> Result<Vec<f32>, Self::Error> {
    (**self).infer(batch)
  }
}

#[cfg(feature = "tract_classifier")]
mod tract_classifier;
#[cfg(feature = "tract_classifier")]
pub use self::tract_classifier::{TractClassifier, TractClassifierBuilder, TractClassifierError};
