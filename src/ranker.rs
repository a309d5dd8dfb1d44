// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/ranker.rs - 推理结果后处理与排序
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

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::{frame::FrameSequence, labels::LabelVocabulary, model::Classifier};

pub const TOP_K: usize = 5;

#[derive(Error, Debug)]
pub enum ClassificationError {
  #[error("cannot classify an empty frame sequence")]
  EmptyFrames,
  #[error("classifier returned {actual} scores for a vocabulary of {expected} labels")]
  ScoreLength { expected: usize, actual: usize },
  #[error("classifier returned a non-finite score at index {index}")]
  NonFinite { index: usize },
  #[error("{0}")]
  Backend(String),
}

/// 单个预测结果，probability 为百分比
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
  pub action: String,
  pub probability: f32,
}

/// 减去最大值后再取指数，避免溢出
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

/// 按分数降序取前 k 个下标，分数相同时下标小者在前
pub fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
  let mut indices: Vec<usize> = (0..scores.len()).collect();
  indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
  indices.truncate(k);
  indices
}

/// 对帧序列推理并返回前 5 个动作
pub fn rank<C, const W: u32, const H: u32>(
  frames: &FrameSequence<W, H>,
  classifier: &C,
  vocabulary: &LabelVocabulary,
) -> Result<Vec<Prediction>, ClassificationError>
where
  C: Classifier + ?Sized,
{
  if frames.is_empty() {
    error!("帧序列为空，跳过推理");
    return Err(ClassificationError::EmptyFrames);
  }

  let batch = frames.as_batch();
  debug!("推理输入形状: {:?}", batch.shape());
  let logits = classifier.infer(&batch).map_err(|e| {
    error!("分类器推理失败: {}", e);
    ClassificationError::Backend(e.to_string())
  })?;

  if logits.len() != vocabulary.len() {
    return Err(ClassificationError::ScoreLength {
      expected: vocabulary.len(),
      actual: logits.len(),
    });
  }
  if let Some(index) = logits.iter().position(|v| !v.is_finite()) {
    return Err(ClassificationError::NonFinite { index });
  }

  let scores = softmax(&logits);
  let predictions = top_k(&scores, TOP_K)
    .into_iter()
    .map(|index| Prediction {
      action: vocabulary.get(index).unwrap_or_default().to_string(),
      probability: scores[index] * 100.0,
    })
    .collect::<Vec<_>>();

  debug!("推理结果: {:?}", predictions);
  Ok(predictions)
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::frame::{FrameBatch, RgbNhwcFrame};

  #[derive(Error, Debug)]
  #[error("{0}")]
  struct StubError(String);

  /// 返回固定 logits 的分类器，记录调用次数
  struct FixedLogits {
    logits: Vec<f32>,
    calls: AtomicUsize,
  }

  impl FixedLogits {
    fn new(logits: Vec<f32>) -> Self {
      Self {
        logits,
        calls: AtomicUsize::new(0),
      }
    }
  }

  impl Classifier for FixedLogits {
    type Error = StubError;

    fn infer(&self, batch: &FrameBatch<'_>) -> Result<Vec<f32>, Self::Error> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      assert_eq!(batch.shape()[0], 1);
      Ok(self.logits.clone())
    }
  }

  struct ShapeChecking;

  impl Classifier for ShapeChecking {
    type Error = StubError;

    fn infer(&self, batch: &FrameBatch<'_>) -> Result<Vec<f32>, Self::Error> {
      Err(StubError(format!("unexpected input shape {:?}", batch.shape())))
    }
  }

  fn vocabulary(n: usize) -> LabelVocabulary {
    LabelVocabulary::new((0..n).map(|i| format!("action {}", i)).collect()).unwrap()
  }

  fn frames(n: usize) -> FrameSequence<4, 4> {
    let mut frames = FrameSequence::new();
    for _ in 0..n {
      frames.push_normalized(&RgbNhwcFrame::default());
    }
    frames
  }

  #[test]
  fn softmax_is_a_distribution() {
    let scores = softmax(&[1.0, 2.0, 3.0, -4.0, 0.5]);
    let sum: f32 = scores.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert!(scores.iter().all(|&s| s >= 0.0));
    assert!(scores[2] > scores[1] && scores[1] > scores[0]);
  }

  #[test]
  fn softmax_is_stable_for_large_logits() {
    let scores = softmax(&[1000.0, 1000.0, 999.0]);
    assert!(scores.iter().all(|s| s.is_finite()));
    assert!((scores[0] - scores[1]).abs() < 1e-6);
    assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
  }

  #[test]
  fn ties_prefer_the_lower_index() {
    assert_eq!(top_k(&[0.1, 0.3, 0.3, 0.2, 0.3, 0.0], 4), vec![1, 2, 4, 3]);
  }

  #[test]
  fn returns_five_sorted_predictions() {
    let classifier = FixedLogits::new(vec![0.0, 5.0, 1.0, 3.0, 3.0, -2.0, 4.0, 0.5]);
    let predictions = rank(&frames(3), &classifier, &vocabulary(8)).unwrap();

    let actions: Vec<_> = predictions.iter().map(|p| p.action.as_str()).collect();
    assert_eq!(
      actions,
      vec!["action 1", "action 6", "action 3", "action 4", "action 2"]
    );
    assert!(
      predictions
        .windows(2)
        .all(|w| w[0].probability >= w[1].probability)
    );
    assert!(predictions.iter().all(|p| p.probability >= 0.0));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn small_vocabularies_return_every_label_once() {
    let classifier = FixedLogits::new(vec![0.2, 0.1, 0.7]);
    let predictions = rank(&frames(1), &classifier, &vocabulary(3)).unwrap();
    assert_eq!(predictions.len(), 3);

    let mut actions: Vec<_> = predictions.iter().map(|p| p.action.clone()).collect();
    actions.sort();
    actions.dedup();
    assert_eq!(actions.len(), 3);

    let total: f32 = predictions.iter().map(|p| p.probability).sum();
    assert!((total - 100.0).abs() < 1e-2);
  }

  #[test]
  fn empty_frames_never_reach_the_classifier() {
    let classifier = FixedLogits::new(vec![0.0; 8]);
    let result = rank(&frames(0), &classifier, &vocabulary(8));
    assert!(matches!(result, Err(ClassificationError::EmptyFrames)));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn classifier_failures_become_classification_errors() {
    let err = rank(&frames(2), &ShapeChecking, &vocabulary(8)).unwrap_err();
    assert!(matches!(err, ClassificationError::Backend(_)));
    assert_eq!(err.to_string(), "unexpected input shape [1, 2, 4, 4, 3]");
  }

  #[test]
  fn mismatched_score_length_is_rejected() {
    let classifier = FixedLogits::new(vec![0.0; 7]);
    assert!(matches!(
      rank(&frames(1), &classifier, &vocabulary(8)),
      Err(ClassificationError::ScoreLength {
        expected: 8,
        actual: 7
      })
    ));
  }

  #[test]
  fn non_finite_scores_are_rejected() {
    let classifier = FixedLogits::new(vec![0.0, f32::NAN, 1.0]);
    assert!(matches!(
      rank(&frames(1), &classifier, &vocabulary(3)),
      Err(ClassificationError::NonFinite { index: 1 })
    ));
  }
}
