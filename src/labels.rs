// 该文件是 Dongzuo （动作识别） 项目的一部分。
// src/labels.rs - 动作标签表
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
  io::{BufRead, BufReader},
  path::Path,
};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("failed to read label file {path}: {source}")]
  Read {
    path: String,
    source: std::io::Error,
  },
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("label vocabulary is empty")]
  Empty,
}

/// 与分类器输出下标一一对应的动作名称表，进程启动时加载一次，之后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
  labels: Vec<String>,
}

impl LabelVocabulary {
  /// 每行一个标签，行号即类别下标
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LabelError::Read {
      path: path.display().to_string(),
      source,
    })?;
    let vocabulary = Self::from_reader(BufReader::new(file))?;
    info!("从 {} 加载 {} 个动作标签", path.display(), vocabulary.len());
    Ok(vocabulary)
  }

  /// 去掉行首尾空白；中间的空行保留以维持下标对齐，末尾的空行忽略
  pub fn from_reader(reader: impl BufRead) -> Result<Self, LabelError> {
    let mut labels = reader
      .lines()
      .map(|line| line.map(|l| l.trim().to_string()))
      .collect::<Result<Vec<_>, _>>()?;

    while labels.last().is_some_and(|l| l.is_empty()) {
      labels.pop();
    }

    Self::new(labels)
  }

  pub fn new(labels: Vec<String>) -> Result<Self, LabelError> {
    if labels.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self { labels })
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}
