// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理引擎
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

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{EngineLoader, FileModelSource, InferenceEngine, SessionManager},
};

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("ONNX Runtime 错误: {0}")]
  RuntimeError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
}

impl OnnxModelError {
  fn runtime(err: impl std::fmt::Display) -> Self {
    OnnxModelError::RuntimeError(err.to_string())
  }
}

/// ONNX 推理会话，只使用第一个输入与第一个输出
pub struct OnnxEngine {
  session: Session,
  input_name: String,
  output_name: String,
}

impl InferenceEngine for OnnxEngine {
  type Error = OnnxModelError;

  fn run(&mut self, shape: [usize; 4], input: &[f32]) -> Result<Vec<f32>, Self::Error> {
    let dims: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
    let tensor = TensorRef::from_array_view((dims, input)).map_err(OnnxModelError::runtime)?;

    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => tensor])
      .map_err(OnnxModelError::runtime)?;

    let (output_shape, data) = outputs[self.output_name.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(OnnxModelError::runtime)?;
    debug!("模型输出形状: {:?}", output_shape);

    Ok(data.to_vec())
  }
}

/// 构建 ONNX 会话所需的运行时参数
#[derive(Debug, Clone, Copy)]
pub struct OnnxLoader {
  intra_threads: usize,
  // 0 表示关闭图优化，1..=3 对应 ONNX Runtime 的优化等级
  optimization: u8,
}

impl OnnxLoader {
  fn optimization_level(&self) -> GraphOptimizationLevel {
    match self.optimization {
      0 => GraphOptimizationLevel::Disable,
      1 => GraphOptimizationLevel::Level1,
      2 => GraphOptimizationLevel::Level2,
      _ => GraphOptimizationLevel::Level3,
    }
  }
}

impl Default for OnnxLoader {
  fn default() -> Self {
    Self {
      intra_threads: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
      optimization: 3,
    }
  }
}

impl EngineLoader for OnnxLoader {
  type Engine = OnnxEngine;
  type Error = OnnxModelError;

  fn load(&self, model: &[u8]) -> Result<Self::Engine, Self::Error> {
    debug!(
      "ONNX 会话参数: intra_threads={}, optimization={}",
      self.intra_threads, self.optimization
    );
    let session = Session::builder()
      .map_err(OnnxModelError::runtime)?
      .with_optimization_level(self.optimization_level())
      .map_err(OnnxModelError::runtime)?
      .with_intra_threads(self.intra_threads)
      .map_err(OnnxModelError::runtime)?
      .commit_from_memory(model)
      .map_err(OnnxModelError::runtime)?;

    let input_name = match session.inputs.as_slice() {
      [input] => input.name.clone(),
      [] => return Err(OnnxModelError::ModelInvalid("模型没有输入".to_string())),
      inputs => {
        error!("预期模型输入数量为 1, 实际为 {}", inputs.len());
        return Err(OnnxModelError::ModelInvalid(format!(
          "预期模型输入数量为 1, 实际为 {}",
          inputs.len()
        )));
      }
    };
    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .ok_or_else(|| OnnxModelError::ModelInvalid("模型没有输出".to_string()))?;

    debug!("模型输入: {}", input_name);
    debug!("模型输出数量: {}, 使用: {}", session.outputs.len(), output_name);

    Ok(OnnxEngine {
      session,
      input_name,
      output_name,
    })
  }
}

/// 由 `onnx` URL 描述的模型，例如
/// `onnx:///srv/models/best.onnx?intra_threads=4&optimization=3`，
/// 相对路径写作 `onnx:models/detection/best.onnx`
#[derive(Debug, Clone)]
pub struct OnnxModelBuilder {
  model_path: String,
  loader: OnnxLoader,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let model_path = urlencoding::decode(url.path())
      .map_err(|e| OnnxModelError::ModelPathError(e.to_string()))?
      .into_owned();
    if model_path.is_empty() || model_path == "/" {
      return Err(OnnxModelError::ModelPathError("模型路径为空".to_string()));
    }

    let mut loader = OnnxLoader::default();
    for (key, value) in url.query_pairs() {
      let invalid = || OnnxModelError::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
      };
      match key.as_ref() {
        "intra_threads" => {
          loader.intra_threads = value.parse().ok().filter(|&n| n > 0).ok_or_else(invalid)?;
        }
        "optimization" => {
          loader.optimization = match value.as_ref() {
            "disable" => 0,
            "all" => 3,
            level => level.parse().ok().filter(|&n| n <= 3).ok_or_else(invalid)?,
          };
        }
        _ => return Err(invalid()),
      }
    }

    Ok(OnnxModelBuilder { model_path, loader })
  }
}

impl OnnxModelBuilder {
  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  /// 只构建会话管理器，模型在首次推理或预热时才加载
  pub fn build(self) -> SessionManager<FileModelSource, OnnxLoader> {
    SessionManager::new(FileModelSource::new(self.model_path), self.loader)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::SessionStatus;

  fn parse(url: &str) -> Result<OnnxModelBuilder, OnnxModelError> {
    OnnxModelBuilder::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn parses_absolute_and_relative_paths() {
    assert_eq!(
      parse("onnx:///srv/models/best.onnx").unwrap().model_path(),
      "/srv/models/best.onnx"
    );
    assert_eq!(
      parse("onnx:models/detection/best.onnx").unwrap().model_path(),
      "models/detection/best.onnx"
    );
    assert_eq!(
      parse("onnx:///srv/my%20models/best.onnx").unwrap().model_path(),
      "/srv/my models/best.onnx"
    );
  }

  #[test]
  fn parses_query_parameters() {
    let builder = parse("onnx:///m.onnx?intra_threads=2&optimization=1").unwrap();
    assert_eq!(builder.loader.intra_threads, 2);
    assert_eq!(builder.loader.optimization, 1);
    assert!(matches!(
      builder.loader.optimization_level(),
      GraphOptimizationLevel::Level1
    ));
  }

  #[test]
  fn rejects_bad_urls() {
    assert!(matches!(
      parse("rknn:///m.rknn"),
      Err(OnnxModelError::SchemeMismatch { .. })
    ));
    assert!(matches!(
      parse("onnx:///m.onnx?intra_threads=0"),
      Err(OnnxModelError::InvalidParameter { .. })
    ));
    assert!(matches!(
      parse("onnx:///m.onnx?gpu=1"),
      Err(OnnxModelError::InvalidParameter { .. })
    ));
  }

  #[test]
  fn build_does_not_touch_the_file() {
    let manager = parse("onnx:///does/not/exist.onnx").unwrap().build();
    assert_eq!(manager.status(), SessionStatus::Uninitialized);

    let err = manager.ensure_ready().unwrap_err();
    assert!(err.is_load_error());
    assert_eq!(manager.status(), SessionStatus::Uninitialized);
  }

  #[test]
  fn corrupt_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("best.onnx");
    std::fs::write(&path, b"not an onnx graph").unwrap();

    let manager = SessionManager::new(FileModelSource::new(&path), OnnxLoader::default());
    assert!(manager.ensure_ready().unwrap_err().is_load_error());
  }
}
