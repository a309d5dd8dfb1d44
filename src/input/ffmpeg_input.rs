// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/input/ffmpeg_input.rs - 基于 ffmpeg 命令行的视频解码输入
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

//! ffmpeg 视频输入模块
//!
//! 先用 `ffprobe` 读取第一条视频流的宽高与旋转信息，再启动 `ffmpeg` 子进程，
//! 以 `bgr24` 原始视频格式把解码后的帧写到标准输出，按帧读取。
//!
//! ffmpeg 默认按显示矩阵自动旋转，竖拍视频旋转 90° 或 270° 时输出宽高互换。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 与 ffprobe 命令行工具。

use std::{
  io::{BufReader, ErrorKind, Read},
  path::Path,
  process::{Child, ChildStdout, Command, Stdio},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{DecodedFrame, PixelOrder};
use crate::frame::RGB_CHANNELS;

#[derive(Error, Debug)]
pub enum FfmpegInputError {
  #[error("failed to run {program} (is it installed?): {source}")]
  Spawn {
    program: &'static str,
    source: std::io::Error,
  },
  #[error("ffprobe failed: {0}")]
  StreamInfo(String),
  #[error("failed to parse ffprobe output: {0}")]
  StreamReport(#[from] serde_json::Error),
  #[error("no video stream found")]
  NoVideoStream,
  #[error("invalid video geometry: {width}x{height}")]
  InvalidGeometry { width: u32, height: u32 },
  #[error("ffmpeg stdout is not available")]
  MissingStdout,
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Deserialize, Debug)]
struct StreamReport {
  #[serde(default)]
  streams: Vec<StreamEntry>,
}

#[derive(Deserialize, Debug)]
struct StreamEntry {
  width: Option<u32>,
  height: Option<u32>,
  #[serde(default)]
  tags: StreamTags,
  #[serde(default)]
  side_data_list: Vec<StreamSideData>,
}

#[derive(Deserialize, Debug, Default)]
struct StreamTags {
  rotate: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamSideData {
  rotation: Option<f64>,
}

impl StreamEntry {
  /// 顺时针旋转角度，取值 0、90、180、270
  fn rotation(&self) -> i64 {
    let degrees = self
      .side_data_list
      .iter()
      .find_map(|side| side.rotation)
      .map(|r| r.round() as i64)
      .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
      .unwrap_or(0);
    degrees.rem_euclid(360)
  }
}

/// 解析 `ffprobe -of json` 的输出，返回旋转后的显示 (宽, 高)
fn parse_stream_report(raw: &[u8]) -> Result<(u32, u32), FfmpegInputError> {
  let output: StreamReport = serde_json::from_slice(raw)?;
  let stream = output
    .streams
    .into_iter()
    .next()
    .ok_or(FfmpegInputError::NoVideoStream)?;

  match (stream.width, stream.height) {
    (Some(width), Some(height)) if width > 0 && height > 0 => match stream.rotation() {
      90 | 270 => Ok((height, width)),
      _ => Ok((width, height)),
    },
    (width, height) => Err(FfmpegInputError::InvalidGeometry {
      width: width.unwrap_or(0),
      height: height.unwrap_or(0),
    }),
  }
}

fn read_dimensions(path: &Path) -> Result<(u32, u32), FfmpegInputError> {
  let output = Command::new("ffprobe")
    .args([
      "-v",
      "error",
      "-select_streams",
      "v:0",
      "-show_entries",
      "stream=width,height:stream_tags=rotate:stream_side_data=rotation",
      "-of",
      "json",
    ])
    .arg(path)
    .stdin(Stdio::null())
    .output()
    .map_err(|source| FfmpegInputError::Spawn {
      program: "ffprobe",
      source,
    })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(FfmpegInputError::StreamInfo(stderr.trim().to_string()));
  }

  parse_stream_report(&output.stdout)
}

/// ffmpeg 视频输入源
///
/// 子进程在输入源被丢弃时结束并回收，无论是读到流末尾、达到帧数上限
/// 还是中途出错。
pub struct FfmpegInput {
  child: Child,
  stdout: BufReader<ChildStdout>,
  width: u32,
  height: u32,
  frame_index: u64,
  finished: bool,
  released: bool,
}

impl FfmpegInput {
  pub fn open(path: &Path) -> Result<Self, FfmpegInputError> {
    let (width, height) = read_dimensions(path)?;
    info!("视频尺寸: {}x{} ({})", width, height, path.display());

    let mut child = Command::new("ffmpeg")
      .args(["-v", "error", "-nostdin", "-i"])
      .arg(path)
      .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "bgr24", "pipe:1"])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|source| FfmpegInputError::Spawn {
        program: "ffmpeg",
        source,
      })?;

    let stdout = match child.stdout.take() {
      Some(stdout) => stdout,
      None => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(FfmpegInputError::MissingStdout);
      }
    };

    Ok(Self {
      child,
      stdout: BufReader::new(stdout),
      width,
      height,
      frame_index: 0,
      finished: false,
      released: false,
    })
  }

  /// 结束并回收子进程，重复调用无副作用
  fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    self.finished = true;

    if let Err(e) = self.child.kill() {
      debug!("结束 ffmpeg 子进程: {}", e);
    }
    match self.child.wait() {
      Ok(status) => debug!("ffmpeg 子进程已回收: {}", status),
      Err(e) => warn!("回收 ffmpeg 子进程失败: {}", e),
    }
  }

  fn frame_size(&self) -> usize {
    self.width as usize * self.height as usize * RGB_CHANNELS
  }
}

impl Iterator for FfmpegInput {
  type Item = Result<DecodedFrame, FfmpegInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let mut data = vec![0u8; self.frame_size()];
    match self.stdout.read_exact(&mut data) {
      Ok(()) => {
        self.frame_index += 1;
        Some(Ok(DecodedFrame {
          width: self.width,
          height: self.height,
          order: PixelOrder::Bgr,
          data,
        }))
      }
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        debug!("ffmpeg 输出结束，共 {} 帧", self.frame_index);
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e.into()))
      }
    }
  }
}

impl Drop for FfmpegInput {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_stream_geometry() {
    let raw = br#"{"programs": [], "streams": [{"width": 640, "height": 480}]}"#;
    assert_eq!(parse_stream_report(raw).unwrap(), (640, 480));
  }

  #[test]
  fn report_without_streams_is_an_error() {
    let raw = br#"{"programs": [], "streams": []}"#;
    assert!(matches!(
      parse_stream_report(raw),
      Err(FfmpegInputError::NoVideoStream)
    ));
  }

  #[test]
  fn zero_geometry_is_an_error() {
    let raw = br#"{"streams": [{"width": 0}]}"#;
    assert!(matches!(
      parse_stream_report(raw),
      Err(FfmpegInputError::InvalidGeometry {
        width: 0,
        height: 0
      })
    ));
  }

  #[test]
  fn garbage_report_is_a_parse_error() {
    assert!(matches!(
      parse_stream_report(b"not json"),
      Err(FfmpegInputError::StreamReport(_))
    ));
  }

  #[test]
  fn portrait_rotation_swaps_geometry() {
    let side_data = br#"{"streams": [{"width": 1920, "height": 1080,
      "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}]}"#;
    assert_eq!(parse_stream_report(side_data).unwrap(), (1080, 1920));

    let legacy_tag = br#"{"streams": [{"width": 1920, "height": 1080, "tags": {"rotate": "90"}}]}"#;
    assert_eq!(parse_stream_report(legacy_tag).unwrap(), (1080, 1920));

    let upside_down = br#"{"streams": [{"width": 1920, "height": 1080,
      "side_data_list": [{"side_data_type": "Display Matrix", "rotation": 180}]}]}"#;
    assert_eq!(parse_stream_report(upside_down).unwrap(), (1920, 1080));
  }

  fn ffmpeg_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|program| {
      Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
    })
  }

  /// 生成 120 帧 64x48 的测试视频，没有 ffmpeg 时返回 None
  fn test_clip(dir: &Path) -> Option<std::path::PathBuf> {
    if !ffmpeg_available() {
      eprintln!("ffmpeg 不可用，跳过");
      return None;
    }
    let clip = dir.join("clip.mkv");
    let status = Command::new("ffmpeg")
      .args(["-v", "error", "-nostdin", "-y", "-f", "lavfi", "-i"])
      .arg("testsrc=size=64x48:rate=30")
      .args(["-frames:v", "120", "-c:v", "ffv1"])
      .arg(&clip)
      .status()
      .unwrap();
    assert!(status.success());
    Some(clip)
  }

  #[test]
  fn decodes_every_frame_until_end_of_stream() {
    let dir = tempfile::tempdir().unwrap();
    let Some(clip) = test_clip(dir.path()) else {
      return;
    };

    let mut input = FfmpegInput::open(&clip).unwrap();
    let mut count = 0;
    for frame in input.by_ref() {
      let frame = frame.unwrap();
      assert_eq!((frame.width(), frame.height()), (64, 48));
      assert_eq!(frame.order(), PixelOrder::Bgr);
      assert_eq!(frame.as_bytes().len(), 64 * 48 * RGB_CHANNELS);
      count += 1;
    }
    assert_eq!(count, 120);
    assert!(input.next().is_none());

    input.release();
    assert!(input.child.try_wait().unwrap().is_some());
  }

  #[test]
  fn sampler_stops_at_its_cap() {
    let dir = tempfile::tempdir().unwrap();
    let Some(clip) = test_clip(dir.path()) else {
      return;
    };

    let input = FfmpegInput::open(&clip).unwrap();
    let frames = crate::sampler::FrameSampler::<224, 224>::default().sample(input);
    assert_eq!(frames.len(), 100);
  }

  #[test]
  fn early_stop_reaps_the_child_once() {
    let dir = tempfile::tempdir().unwrap();
    let Some(clip) = test_clip(dir.path()) else {
      return;
    };

    let mut input = FfmpegInput::open(&clip).unwrap();
    for _ in 0..3 {
      input.next().unwrap().unwrap();
    }
    input.release();
    assert!(input.child.try_wait().unwrap().is_some());
    assert!(input.next().is_none());

    input.release();
    drop(input);
  }

  #[test]
  fn garbage_upload_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    if !ffmpeg_available() {
      return;
    }
    let path = dir.path().join("upload.mp4");
    std::fs::write(&path, b"definitely not a video").unwrap();
    assert!(matches!(
      FfmpegInput::open(&path),
      Err(FfmpegInputError::StreamInfo(_))
    ));
  }
}
