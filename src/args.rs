// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/args.rs - 服务参数配置
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

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

use dongzuo::{
  input::InputBackend,
  output::{DEFAULT_PREVIEW_NAME, DEFAULT_PREVIEW_URL_PREFIX, PreviewMode},
  server::ServerConfig,
};

/// Dongzuo 动作识别服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型地址，例如 onnx:///models/i3d.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 标签文件，每行一个动作名称
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,

  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:5000", value_name = "ADDR")]
  pub bind: SocketAddr,

  /// 静态文件目录，预览 GIF 写入此处
  #[arg(long, default_value = "static", value_name = "DIR")]
  pub static_dir: PathBuf,

  /// 返回给客户端的预览路径前缀
  #[arg(long, default_value = DEFAULT_PREVIEW_URL_PREFIX, value_name = "PREFIX")]
  pub preview_url_prefix: String,

  /// 预览文件名
  #[arg(long, default_value = DEFAULT_PREVIEW_NAME, value_name = "NAME")]
  pub preview_name: String,

  /// 预览命名方式：fixed（所有请求共用一个文件）或 unique
  #[arg(long, default_value = "fixed", value_name = "MODE")]
  pub preview_mode: PreviewMode,

  /// unique 模式下保留的最近预览数量，更早的文件会被删除
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub preview_retain: usize,

  /// 预览帧率
  #[arg(long, default_value = "10", value_name = "FPS")]
  pub preview_fps: u32,

  /// 每个视频最多采样的帧数，至少为 1
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub max_frames: usize,

  /// 解码后端：ffmpeg 或 gst
  #[arg(long, default_value_t = InputBackend::default(), value_name = "BACKEND")]
  pub input: InputBackend,

  /// 上传大小上限 (MiB)
  #[arg(long, default_value = "200", value_name = "MIB")]
  pub max_upload_mb: usize,

  /// 单个请求的处理时限（秒），不设置表示不限制
  #[arg(long, value_name = "SECONDS")]
  pub request_timeout_secs: Option<u64>,
}

impl Args {
  pub fn server_config(&self) -> ServerConfig {
    ServerConfig {
      static_dir: self.static_dir.clone(),
      max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
      request_timeout: self.request_timeout_secs.map(Duration::from_secs),
    }
  }
}
