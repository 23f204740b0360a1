// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/label.rs - 类别标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

/// 蔬菜检测模型的类别名称，下标即类别编号
pub const VEGETABLE_LABELS: [&str; 5] = [
  "Beans",
  "Bitter_Gourd",
  "Bottle_Gourd",
  "Broccoli",
  "Cabbage",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("标签表为空")]
  Empty,
}

/// 只读的类别标签表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
}

impl Default for LabelTable {
  fn default() -> Self {
    Self::vegetables()
  }
}

impl LabelTable {
  pub fn vegetables() -> Self {
    VEGETABLE_LABELS.iter().copied().collect()
  }

  /// 从 JSON 字符串数组文件加载标签表，例如 `["Beans", "Cabbage"]`
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let labels: Vec<String> = serde_json::from_str(&content)?;
    if labels.is_empty() {
      return Err(LabelError::Empty);
    }
    debug!("标签数量: {}", labels.len());
    Ok(Self {
      labels: labels.into_boxed_slice(),
    })
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.labels.get(class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().map(Into::into).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn vegetables_keep_model_order() {
    let table = LabelTable::vegetables();
    assert_eq!(table.len(), 5);
    assert_eq!(table.get(0), Some("Beans"));
    assert_eq!(table.get(4), Some("Cabbage"));
    assert_eq!(table.get(5), None);
  }

  #[test]
  fn loads_labels_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"["bean", "bitter gourd"]"#).unwrap();

    let table = LabelTable::from_json_file(file.path()).unwrap();
    assert_eq!(table.iter().collect::<Vec<_>>(), vec!["bean", "bitter gourd"]);
  }

  #[test]
  fn rejects_empty_label_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[]").unwrap();

    assert!(matches!(
      LabelTable::from_json_file(file.path()),
      Err(LabelError::Empty)
    ));
  }

  #[test]
  fn rejects_malformed_label_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"labels": 1}}"#).unwrap();

    assert!(matches!(
      LabelTable::from_json_file(file.path()),
      Err(LabelError::FormatError(_))
    ));
  }
}
