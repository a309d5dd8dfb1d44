// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/bin/simple_predict.rs - 单个视频的识别测试代码
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

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use dongzuo::{
  FromUrl,
  frame::I3D_INPUT_SIZE,
  input::InputBackend,
  labels::LabelVocabulary,
  model::TractClassifierBuilder,
  output::GifPreviewOutput,
  ranker,
  sampler::FrameSampler,
};

/// 对单个视频文件运行动作识别
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 标签文件
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,
  /// 输入视频
  #[arg(long, value_name = "VIDEO")]
  pub video: PathBuf,
  /// 预览 GIF 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub preview: Option<PathBuf>,
  /// 解码后端
  #[arg(long, default_value_t = InputBackend::default(), value_name = "BACKEND")]
  pub input: InputBackend,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入视频: {}", args.video.display());

  let vocabulary = LabelVocabulary::from_file(&args.labels)?;
  let classifier = TractClassifierBuilder::from_url(&args.model)?.build()?;

  let sampler = FrameSampler::<I3D_INPUT_SIZE, I3D_INPUT_SIZE>::default();
  let frames = sampler.sample_path(&args.input, &args.video);
  if frames.is_empty() {
    bail!("未能从 {} 解码出任何帧", args.video.display());
  }
  info!("采样到 {} 帧", frames.len());

  info!("开始推理...");
  let now = std::time::Instant::now();
  let predictions = ranker::rank(&frames, &classifier, &vocabulary)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  for (rank, prediction) in predictions.iter().enumerate() {
    info!(
      "{}. {} - {:.2}%",
      rank + 1,
      prediction.action,
      prediction.probability
    );
  }

  if let Some(preview) = &args.preview {
    GifPreviewOutput::default().encode(&frames, preview)?;
  }

  Ok(())
}
