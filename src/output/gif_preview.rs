// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/output/gif_preview.rs - 采样帧的 GIF 动画预览
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
  fs::File,
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use image::{
  Delay, DynamicImage, Frame, RgbImage,
  codecs::gif::{GifEncoder, Repeat},
};
use tracing::info;

use super::{PreviewError, quantize};
use crate::frame::FrameSequence;

pub const DEFAULT_PREVIEW_FPS: u32 = 10;
const GIF_QUANTIZE_SPEED: i32 = 10;

/// 把帧序列编码为无限循环的 GIF
#[derive(Debug, Clone)]
pub struct GifPreviewOutput {
  fps: u32,
}

impl Default for GifPreviewOutput {
  fn default() -> Self {
    Self {
      fps: DEFAULT_PREVIEW_FPS,
    }
  }
}

impl GifPreviewOutput {
  pub fn new(fps: u32) -> Result<Self, PreviewError> {
    if fps == 0 {
      return Err(PreviewError::InvalidFps(fps));
    }
    Ok(Self { fps })
  }

  /// 写入 `out_path`，覆盖已有文件，返回写入的路径
  pub fn encode<const W: u32, const H: u32>(
    &self,
    frames: &FrameSequence<W, H>,
    out_path: &Path,
  ) -> Result<PathBuf, PreviewError> {
    if frames.is_empty() {
      return Err(PreviewError::EmptySequence);
    }

    if let Some(parent) = out_path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let mut writer = BufWriter::new(File::create(out_path)?);
    {
      let mut encoder = GifEncoder::new_with_speed(&mut writer, GIF_QUANTIZE_SPEED);
      encoder.set_repeat(Repeat::Infinite)?;

      let delay = Delay::from_numer_denom_ms(1000, self.fps);
      for frame in frames.frames() {
        let rgb = RgbImage::from_raw(W, H, quantize(frame)).ok_or_else(|| {
          PreviewError::IoError(std::io::Error::other("frame buffer does not match its size"))
        })?;
        let rgba = DynamicImage::ImageRgb8(rgb).into_rgba8();
        encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
      }
    }
    writer.flush()?;

    info!(
      "预览已保存: {} ({} 帧 @ {} fps)",
      out_path.display(),
      frames.len(),
      self.fps
    );
    Ok(out_path.to_path_buf())
  }
}
