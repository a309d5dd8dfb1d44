// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/output.rs - 预览输出
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

mod gif_preview;
pub use self::gif_preview::{DEFAULT_PREVIEW_FPS, GifPreviewOutput};

mod preview_sink;
pub use self::preview_sink::{
  DEFAULT_PREVIEW_NAME, DEFAULT_PREVIEW_URL_PREFIX, PreviewArtifact, PreviewMode, PreviewSink,
};

#[derive(Error, Debug)]
pub enum PreviewError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("image error: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("cannot write a preview of an empty frame sequence")]
  EmptySequence,
  #[error("invalid preview frame rate: {0}")]
  InvalidFps(u32),
  #[error("unknown preview mode: {0}")]
  UnknownMode(String),
}

/// 把 [0, 1] 的浮点像素放大到 [0, 255] 并截断为 8 位
pub fn quantize(frame: &[f32]) -> Vec<u8> {
  frame.iter().map(|&v| (v * 255.0) as u8).collect()
}
