// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/frame.rs - NHWC 帧与归一化帧序列定义
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

pub const RGB_CHANNELS: usize = 3;

/// I3D 模型的输入边长
pub const I3D_INPUT_SIZE: u32 = 224;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("frame buffer length mismatch: expected {expected} bytes, got {actual} bytes")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 8 位 RGB 帧，HWC 排布，尺寸在编译期固定
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  pub const LEN: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNhwcFrame<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    if data.len() != Self::LEN {
      return Err(FrameError::LengthMismatch {
        expected: Self::LEN,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0u8; Self::LEN].into_boxed_slice(),
    }
  }
}

/// 归一化后的帧序列
///
/// 所有帧连续存放在一个 `[T, H, W, 3]` 的 `f32` 缓冲区中，取值范围 [0, 1]，
/// 通道顺序为 RGB。帧序列可以为空，由下游的排序器负责拒绝。
#[derive(Debug, Clone, Default)]
pub struct FrameSequence<const W: u32, const H: u32> {
  data: Vec<f32>,
  len: usize,
}

/// 带 batch 维度的只读张量视图，形状为 `[1, T, H, W, 3]`
#[derive(Debug, Clone, Copy)]
pub struct FrameBatch<'a> {
  shape: [usize; 5],
  data: &'a [f32],
}

impl FrameBatch<'_> {
  pub fn shape(&self) -> [usize; 5] {
    self.shape
  }

  pub fn data(&self) -> &[f32] {
    self.data
  }

  pub fn num_frames(&self) -> usize {
    self.shape[1]
  }
}

impl<const W: u32, const H: u32> FrameSequence<W, H> {
  pub const FRAME_LEN: usize = RgbNhwcFrame::<W, H>::LEN;

  pub fn new() -> Self {
    Self {
      data: Vec::new(),
      len: 0,
    }
  }

  pub fn with_capacity(frames: usize) -> Self {
    Self {
      data: Vec::with_capacity(frames * Self::FRAME_LEN),
      len: 0,
    }
  }

  /// 追加一帧，像素值除以 255 归一化到 [0, 1]
  pub fn push_normalized(&mut self, frame: &RgbNhwcFrame<W, H>) {
    self
      .data
      .extend(frame.as_nhwc().iter().map(|&v| v as f32 / 255.0));
    self.len += 1;
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn frame(&self, index: usize) -> Option<&[f32]> {
    self.frames().nth(index)
  }

  pub fn frames(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(Self::FRAME_LEN)
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_batch(&self) -> FrameBatch<'_> {
    FrameBatch {
      shape: [1, self.len, H as usize, W as usize, RGB_CHANNELS],
      data: &self.data,
    }
  }
}
