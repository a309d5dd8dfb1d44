// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/input.rs - 视频输入
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

use std::{fmt, path::Path, str::FromStr};

use thiserror::Error;

use crate::frame::RGB_CHANNELS;

#[cfg(not(any(feature = "ffmpeg_input", feature = "gstreamer_input")))]
compile_error!("enable at least one of the `ffmpeg_input` or `gstreamer_input` features");

#[cfg(feature = "ffmpeg_input")]
mod ffmpeg_input;
#[cfg(feature = "ffmpeg_input")]
pub use self::ffmpeg_input::{FfmpegInput, FfmpegInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

/// 解码帧的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
  /// 采集端原生顺序
  Bgr,
  Rgb,
}

/// 解码器输出的一帧，紧密排布的 8 位像素，尺寸与原视频一致
#[derive(Debug, Clone)]
pub struct DecodedFrame {
  width: u32,
  height: u32,
  order: PixelOrder,
  data: Vec<u8>,
}

impl DecodedFrame {
  pub fn new(width: u32, height: u32, order: PixelOrder, data: Vec<u8>) -> Result<Self, InputError> {
    let expected = width as usize * height as usize * RGB_CHANNELS;
    if width == 0 || height == 0 || data.len() != expected {
      return Err(InputError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      order,
      data,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn order(&self) -> PixelOrder {
    self.order
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.data
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "ffmpeg_input")]
  #[error("ffmpeg input error: {0}")]
  FfmpegInputError(#[from] FfmpegInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("Unknown input backend: {0}")]
  UnknownBackend(String),
}

/// 打开视频文件并得到一个按解码顺序产出帧的源
///
/// 源在被丢弃时释放底层解码资源。
pub trait OpenVideo {
  type Error: std::error::Error + Send + Sync + 'static;
  type Source: Iterator<Item = Result<DecodedFrame, Self::Error>>;

  fn open(&self, path: &Path) -> Result<Self::Source, Self::Error>;
}

/// 可选的解码后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBackend {
  #[cfg(feature = "ffmpeg_input")]
  Ffmpeg,
  #[cfg(feature = "gstreamer_input")]
  GStreamer,
}

impl Default for InputBackend {
  #[cfg(feature = "ffmpeg_input")]
  fn default() -> Self {
    InputBackend::Ffmpeg
  }

  #[cfg(all(not(feature = "ffmpeg_input"), feature = "gstreamer_input"))]
  fn default() -> Self {
    InputBackend::GStreamer
  }
}

impl FromStr for InputBackend {
  type Err = InputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      #[cfg(feature = "ffmpeg_input")]
      "ffmpeg" => Ok(InputBackend::Ffmpeg),
      #[cfg(feature = "gstreamer_input")]
      "gst" | "gstreamer" => Ok(InputBackend::GStreamer),
      other => Err(InputError::UnknownBackend(other.to_string())),
    }
  }
}

impl fmt::Display for InputBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      #[cfg(feature = "ffmpeg_input")]
      InputBackend::Ffmpeg => f.write_str("ffmpeg"),
      #[cfg(feature = "gstreamer_input")]
      InputBackend::GStreamer => f.write_str("gst"),
    }
  }
}

impl OpenVideo for InputBackend {
  type Error = InputError;
  type Source = InputWrapper;

  fn open(&self, path: &Path) -> Result<Self::Source, Self::Error> {
    match self {
      #[cfg(feature = "ffmpeg_input")]
      InputBackend::Ffmpeg => Ok(InputWrapper::Ffmpeg(FfmpegInput::open(path)?)),
      #[cfg(feature = "gstreamer_input")]
      InputBackend::GStreamer => Ok(InputWrapper::GStreamer(GStreamerInput::open(path)?)),
    }
  }
}

pub enum InputWrapper {
  #[cfg(feature = "ffmpeg_input")]
  Ffmpeg(FfmpegInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerInput),
}

impl Iterator for InputWrapper {
  type Item = Result<DecodedFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "ffmpeg_input")]
      InputWrapper::Ffmpeg(input) => input.next().map(|r| r.map_err(InputError::from)),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.next().map(|r| r.map_err(InputError::from)),
    }
  }
}
