// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/sampler.rs - 帧采样与预处理
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

use std::{fmt::Display, path::Path};

use image::{
  ImageBuffer, Rgb,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::{FrameSequence, RgbNhwcFrame},
  input::{DecodedFrame, OpenVideo, PixelOrder},
};

pub const DEFAULT_MAX_FRAMES: usize = 100;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SamplerError {
  #[error("max frames must be at least 1")]
  ZeroMaxFrames,
}

/// 帧采样器
///
/// 按解码顺序最多取 `max_frames` 帧，每帧做中心正方形裁剪、缩放到 W×H、
/// BGR 转 RGB，最后归一化到 [0, 1]。
#[derive(Debug, Clone)]
pub struct FrameSampler<const W: u32, const H: u32> {
  max_frames: usize,
}

impl<const W: u32, const H: u32> Default for FrameSampler<W, H> {
  fn default() -> Self {
    Self {
      max_frames: DEFAULT_MAX_FRAMES,
    }
  }
}

impl<const W: u32, const H: u32> FrameSampler<W, H> {
  /// 上限为 0 时每个请求都会得到空序列，因此直接拒绝
  pub fn new(max_frames: usize) -> Result<Self, SamplerError> {
    if max_frames == 0 {
      return Err(SamplerError::ZeroMaxFrames);
    }
    Ok(Self { max_frames })
  }

  /// 从帧源采样
  ///
  /// 达到上限后不再拉取新帧，帧源随即被丢弃以释放解码资源。
  /// 解码错误等同于流结束，保留已采到的帧。
  pub fn sample<I, E>(&self, source: I) -> FrameSequence<W, H>
  where
    I: IntoIterator<Item = Result<DecodedFrame, E>>,
    E: Display,
  {
    let mut frames = FrameSequence::with_capacity(self.max_frames);
    let mut source = source.into_iter();

    while frames.len() < self.max_frames {
      let decoded = match source.next() {
        Some(Ok(decoded)) => decoded,
        Some(Err(e)) => {
          warn!("第 {} 帧解码失败，停止采样: {}", frames.len(), e);
          break;
        }
        None => break,
      };

      match center_square_resize::<W, H>(decoded) {
        Some(frame) => frames.push_normalized(&frame),
        None => warn!("跳过无效帧 (已采样 {} 帧)", frames.len()),
      }
    }
    drop(source);

    debug!("采样完成: {} 帧 (上限 {})", frames.len(), self.max_frames);
    frames
  }

  /// 打开视频文件并采样，无法打开时返回空序列
  pub fn sample_path<O: OpenVideo>(&self, opener: &O, path: &Path) -> FrameSequence<W, H> {
    match opener.open(path) {
      Ok(source) => self.sample(source),
      Err(e) => {
        warn!("无法打开视频 {}: {}", path.display(), e);
        FrameSequence::new()
      }
    }
  }
}

/// 中心正方形裁剪后缩放到 W×H，并转换为 RGB 顺序
pub fn center_square_resize<const W: u32, const H: u32>(
  decoded: DecodedFrame,
) -> Option<RgbNhwcFrame<W, H>> {
  let (width, height, order) = (decoded.width(), decoded.height(), decoded.order());
  if width == 0 || height == 0 {
    return None;
  }

  // 像素类型沿用 Rgb<u8>，实际通道顺序由 order 决定
  let image: ImageBuffer<Rgb<u8>, Vec<u8>> =
    ImageBuffer::from_raw(width, height, decoded.into_bytes())?;

  let min_dim = width.min(height);
  let start_y = (height - min_dim) / 2;
  let start_x = (width - min_dim) / 2;
  let cropped = imageops::crop_imm(&image, start_x, start_y, min_dim, min_dim).to_image();
  let mut resized = imageops::resize(&cropped, W, H, FilterType::Triangle);

  if order == PixelOrder::Bgr {
    for pixel in resized.pixels_mut() {
      pixel.0.reverse();
    }
  }

  RgbNhwcFrame::try_from(resized.into_raw()).ok()
}
