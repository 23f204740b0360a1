// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

/// 已加载、可执行的推理引擎
pub trait InferenceEngine: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 以单个输入执行推理，返回第一个输出的扁平数据
  fn run(&mut self, shape: [usize; 4], input: &[f32]) -> Result<Vec<f32>, Self::Error>;

  /// 释放底层资源，默认直接析构
  fn release(self) -> Result<(), Self::Error>
  where
    Self: Sized,
  {
    Ok(())
  }
}

/// 将模型文件内容构建为推理引擎
pub trait EngineLoader: Send + Sync {
  type Engine: InferenceEngine;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, model: &[u8]) -> Result<Self::Engine, Self::Error>;
}

/// 模型文件的字节来源
pub trait ModelSource: Send + Sync {
  fn read_model(&self) -> std::io::Result<Vec<u8>>;
  fn describe(&self) -> String;
}

/// 磁盘上的模型文件
#[derive(Debug, Clone)]
pub struct FileModelSource {
  path: PathBuf,
}

impl FileModelSource {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self { path: path.into() }
  }
}

impl ModelSource for FileModelSource {
  fn read_model(&self) -> std::io::Result<Vec<u8>> {
    std::fs::read(&self.path)
  }

  fn describe(&self) -> String {
    self.path.display().to_string()
  }
}

/// 模型原始输出，每条记录 6 个值：`[x1, y1, x2, y2, confidence, class_id]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
  data: Box<[f32]>,
}

pub const RAW_RECORD_LEN: usize = 6;

impl RawOutput {
  pub fn records(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(RAW_RECORD_LEN)
  }

  /// 末尾不足一条记录的数值个数，正常模型输出应为 0
  pub fn remainder(&self) -> usize {
    self.data.len() % RAW_RECORD_LEN
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl From<Vec<f32>> for RawOutput {
  fn from(data: Vec<f32>) -> Self {
    Self {
      data: data.into_boxed_slice(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

/// 单个检测结果，置信度为百分数，数值均保留两位小数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

mod decode;
mod onnx;
mod session;

pub use self::decode::{DEFAULT_CONFIDENCE_THRESHOLD, DetectionDecoder};
pub use self::onnx::{OnnxEngine, OnnxLoader, OnnxModelBuilder, OnnxModelError};
pub use self::session::{SessionError, SessionManager, SessionStatus};
