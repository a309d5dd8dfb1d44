// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/main.rs - 动作识别服务主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use dongzuo::{
  FromUrl,
  labels::LabelVocabulary,
  model::TractClassifierBuilder,
  output::{GifPreviewOutput, PreviewSink},
  server,
  task::Pipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Dongzuo 动作识别服务");
  info!("模型地址: {}", args.model);
  info!("标签文件: {}", args.labels.display());
  info!("解码后端: {}", args.input);
  info!("预览模式: {}", args.preview_mode);

  let vocabulary = LabelVocabulary::from_file(&args.labels)
    .with_context(|| format!("无法加载标签文件 {}", args.labels.display()))?;
  info!("已加载 {} 个动作标签", vocabulary.len());

  info!("正在加载模型...");
  let now = std::time::Instant::now();
  let classifier = TractClassifierBuilder::from_url(&args.model)?.build()?;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());

  std::fs::create_dir_all(&args.static_dir)
    .with_context(|| format!("无法创建静态目录 {}", args.static_dir.display()))?;

  let sink = PreviewSink::new(
    &args.static_dir,
    &args.preview_url_prefix,
    &args.preview_name,
    args.preview_mode,
  )
  .with_retention(args.preview_retain);
  let pipeline = Pipeline::new(classifier, Arc::new(vocabulary), args.input, sink)
    .with_max_frames(args.max_frames)?
    .with_preview(GifPreviewOutput::new(args.preview_fps)?);

  let app = server::router(pipeline, &args.server_config());
  let listener = tokio::net::TcpListener::bind(args.bind)
    .await
    .with_context(|| format!("无法监听 {}", args.bind))?;
  info!("服务已启动: http://{}", args.bind);

  axum::serve(listener, app).await?;
  Ok(())
}
