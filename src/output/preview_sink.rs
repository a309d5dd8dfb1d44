// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/output/preview_sink.rs - 预览文件位置分配
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
  collections::VecDeque,
  fmt,
  io::ErrorKind,
  path::{Path, PathBuf},
  str::FromStr,
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
};

use chrono::Utc;
use tracing::{debug, warn};

use super::PreviewError;

pub const DEFAULT_PREVIEW_NAME: &str = "generated_gif.gif";
pub const DEFAULT_PREVIEW_URL_PREFIX: &str = "./static";

/// 预览文件的命名方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewMode {
  /// 固定文件名，每个请求覆盖同一个文件。
  ///
  /// 并发请求之间没有隔离：后写入者覆盖先写入者，读取方可能拿到
  /// 别的请求的预览，甚至是写了一半的文件。
  #[default]
  Fixed,
  /// 每个请求使用独立的文件名
  ///
  /// 文件不会被自动清理，除非用 [`PreviewSink::with_retention`] 设置保留上限，
  /// 否则静态目录会随请求数量持续增长。
  Unique,
}

impl FromStr for PreviewMode {
  type Err = PreviewError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "fixed" => Ok(PreviewMode::Fixed),
      "unique" => Ok(PreviewMode::Unique),
      other => Err(PreviewError::UnknownMode(other.to_string())),
    }
  }
}

impl fmt::Display for PreviewMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PreviewMode::Fixed => f.write_str("fixed"),
      PreviewMode::Unique => f.write_str("unique"),
    }
  }
}

/// 一次请求的预览文件：磁盘路径与返回给客户端的相对路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewArtifact {
  pub file_path: PathBuf,
  pub public_path: String,
}

/// 静态目录下的预览文件分配器
#[derive(Debug)]
pub struct PreviewSink {
  directory: PathBuf,
  url_prefix: String,
  name: String,
  mode: PreviewMode,
  counter: AtomicU64,
  retention: Option<usize>,
  issued: Mutex<VecDeque<PathBuf>>,
}

impl PreviewSink {
  pub fn new(
    directory: impl Into<PathBuf>,
    url_prefix: impl Into<String>,
    name: impl Into<String>,
    mode: PreviewMode,
  ) -> Self {
    Self {
      directory: directory.into(),
      url_prefix: url_prefix.into(),
      name: name.into(),
      mode,
      counter: AtomicU64::new(0),
      retention: None,
      issued: Mutex::new(VecDeque::new()),
    }
  }

  /// 唯一命名模式下最多保留最近 `keep` 个预览，更早的文件在分配新文件时删除
  pub fn with_retention(mut self, keep: usize) -> Self {
    self.retention = Some(keep.max(1));
    self
  }

  /// `static/generated_gif.gif`，对外路径 `./static/generated_gif.gif`
  pub fn fixed(directory: impl Into<PathBuf>) -> Self {
    Self::new(
      directory,
      DEFAULT_PREVIEW_URL_PREFIX,
      DEFAULT_PREVIEW_NAME,
      PreviewMode::Fixed,
    )
  }

  pub fn allocate(&self) -> PreviewArtifact {
    let name = match self.mode {
      PreviewMode::Fixed => self.name.clone(),
      PreviewMode::Unique => {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let stem = Path::new(&self.name)
          .file_stem()
          .map(|s| s.to_string_lossy().into_owned())
          .unwrap_or_else(|| "preview".to_string());
        format!(
          "{}-{}-{:04X}.gif",
          stem,
          Utc::now().format("%Y%m%d-%H%M%S"),
          id
        )
      }
    };

    let file_path = self.directory.join(&name);
    if self.mode == PreviewMode::Unique {
      self.retire_expired(file_path.clone());
    }

    PreviewArtifact {
      file_path,
      public_path: format!("{}/{}", self.url_prefix.trim_end_matches('/'), name),
    }
  }

  fn retire_expired(&self, latest: PathBuf) {
    let Some(keep) = self.retention else {
      return;
    };

    let expired = {
      let mut issued = match self.issued.lock() {
        Ok(issued) => issued,
        Err(poisoned) => poisoned.into_inner(),
      };
      issued.push_back(latest);
      let excess = issued.len().saturating_sub(keep);
      issued.drain(..excess).collect::<Vec<_>>()
    };

    for path in expired {
      match std::fs::remove_file(&path) {
        Ok(()) => debug!("已删除过期预览: {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("删除过期预览 {} 失败: {}", path.display(), e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_mode_always_returns_the_same_slot() {
    let sink = PreviewSink::fixed("static");
    let first = sink.allocate();
    let second = sink.allocate();

    assert_eq!(first, second);
    assert_eq!(first.file_path, Path::new("static").join("generated_gif.gif"));
    assert_eq!(first.public_path, "./static/generated_gif.gif");
  }

  #[test]
  fn unique_mode_never_repeats() {
    let sink = PreviewSink::new("/srv/static", "/static/", "generated_gif.gif", PreviewMode::Unique);
    let first = sink.allocate();
    let second = sink.allocate();

    assert_ne!(first.file_path, second.file_path);
    assert!(first.public_path.starts_with("/static/generated_gif-"));
    assert!(first.public_path.ends_with("-0001.gif"));
    assert!(second.public_path.ends_with("-0002.gif"));
    assert!(first.file_path.starts_with("/srv/static"));
  }

  #[test]
  fn unique_mode_retires_previews_beyond_the_cap() {
    let dir = tempfile::tempdir().unwrap();
    let sink = PreviewSink::new(dir.path(), "./static", "generated_gif.gif", PreviewMode::Unique)
      .with_retention(2);

    let mut written = Vec::new();
    for _ in 0..4 {
      let artifact = sink.allocate();
      std::fs::write(&artifact.file_path, b"GIF89a").unwrap();
      written.push(artifact.file_path);
    }

    assert!(!written[0].exists());
    assert!(!written[1].exists());
    assert!(written[2].exists());
    assert!(written[3].exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
  }

  #[test]
  fn fixed_mode_ignores_retention() {
    let dir = tempfile::tempdir().unwrap();
    let sink = PreviewSink::fixed(dir.path()).with_retention(1);
    let artifact = sink.allocate();
    std::fs::write(&artifact.file_path, b"GIF89a").unwrap();
    assert_eq!(sink.allocate(), artifact);
    assert!(artifact.file_path.exists());
  }

  #[test]
  fn mode_parses_from_its_name() {
    assert_eq!("unique".parse::<PreviewMode>().unwrap(), PreviewMode::Unique);
    assert_eq!(PreviewMode::default().to_string(), "fixed");
    assert!("random".parse::<PreviewMode>().is_err());
  }
}
