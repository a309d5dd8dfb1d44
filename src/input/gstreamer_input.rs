// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入模块
//!
//! 以 `filesrc ! decodebin ! videoconvert` 解码上传的视频文件，
//! 在 appsink 上按 BGR 格式逐帧拉取。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## Cargo 特性
//!
//! ```toml
//! [dependencies]
//! dongzuo = { version = "0.1", features = ["gstreamer_input"] }
//! ```
//!
//! appsink 不丢帧：解码速度受消费速度约束，保证帧序完整。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{DecodedFrame, PixelOrder};
use crate::frame::RGB_CHANNELS;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const PULL_INTERVAL: gst::ClockTime = gst::ClockTime::from_mseconds(100);

fn pipeline_description(path: &Path) -> String {
  let location = path.display().to_string().replace('"', "\\\"");
  format!(
    "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=BGR ! \
     appsink name=sink sync=false max-buffers=4",
    location
  )
}

/// GStreamer 视频输入
///
/// 管道在输入源被丢弃时切换到 Null 状态。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  bus: gst::Bus,
  frame_index: u64,
  finished: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
    debug!("GStreamer 管道已停止，共拉取 {} 帧", self.frame_index);
  }
}

impl GStreamerInput {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let description = pipeline_description(path);
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    let bus = pipeline
      .bus()
      .ok_or_else(|| GStreamerInputError::PipelineError("Pipeline has no bus".to_string()))?;

    let input = GStreamerInput {
      pipeline,
      appsink,
      bus,
      frame_index: 0,
      finished: false,
    };
    input.pipeline.set_state(gst::State::Playing)?;

    Ok(input)
  }

  /// 取出总线上的错误消息，流结束由 appsink 自己判断
  fn poll_bus_error(&self) -> Option<GStreamerInputError> {
    let message = self.bus.pop_filtered(&[gst::MessageType::Error])?;
    let gst::MessageView::Error(err) = message.view() else {
      return None;
    };

    let source = err
      .src()
      .map(|s| s.path_string().to_string())
      .unwrap_or_else(|| "pipeline".to_string());
    warn!("GStreamer 解码失败 ({}): {}", source, err.error());
    if let Some(debug_info) = err.debug() {
      debug!("调试信息: {}", debug_info);
    }
    Some(GStreamerInputError::PipelineError(format!(
      "{}: {}",
      source,
      err.error()
    )))
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<DecodedFrame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    // 解码失败只反映在总线上，appsink 不会收到 EOS
    loop {
      if let Some(sample) = self.appsink.try_pull_sample(PULL_INTERVAL) {
        self.frame_index += 1;
        return Some(convert_sample(sample));
      }

      if self.appsink.is_eos() {
        debug!("appsink 已到达流末尾，共 {} 帧", self.frame_index);
        self.finished = true;
        return None;
      }

      if let Some(e) = self.poll_bus_error() {
        self.finished = true;
        return Some(Err(e));
      }
    }
  }
}

fn convert_sample(sample: gst::Sample) -> Result<DecodedFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let order = match video_info.format() {
    gst_video::VideoFormat::Bgr => PixelOrder::Bgr,
    gst_video::VideoFormat::Rgb => PixelOrder::Rgb,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row_len = width * RGB_CHANNELS;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // 行按 4 字节对齐，最后一行可以没有填充
  let expected_size = stride * height.saturating_sub(1) + row_len;
  if stride < row_len || data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut packed = Vec::with_capacity(row_len * height);
  for row in 0..height {
    let row_start = row * stride;
    packed.extend_from_slice(&data[row_start..row_start + row_len]);
  }

  Ok(DecodedFrame {
    width: width as u32,
    height: height as u32,
    order,
    data: packed,
  })
}
