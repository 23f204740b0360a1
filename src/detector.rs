// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/detector.rs - 蔬菜检测器
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
  fmt,
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::{
  input::{DetectorPreprocessor, ImageSource, PreprocessError},
  label::LabelTable,
  model::{
    Detection, DetectionDecoder, EngineLoader, FileModelSource, ModelSource, OnnxLoader,
    SessionError, SessionManager, SessionStatus,
  },
};

/// 单次检测请求所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
  Received,
  Preprocessing,
  AwaitingSession,
  Running,
  Decoding,
  Completed,
  Failed,
}

impl fmt::Display for RequestStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      RequestStage::Received => "received",
      RequestStage::Preprocessing => "preprocessing",
      RequestStage::AwaitingSession => "awaiting-session",
      RequestStage::Running => "running",
      RequestStage::Decoding => "decoding",
      RequestStage::Completed => "completed",
      RequestStage::Failed => "failed",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum InferenceFailure {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[source] SessionError),
  #[error("图像预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理错误: {source}")]
  Inference {
    stage: RequestStage,
    #[source]
    source: SessionError,
  },
}

impl InferenceFailure {
  fn from_session(stage: RequestStage, err: SessionError) -> Self {
    if err.is_load_error() {
      InferenceFailure::ModelLoad(err)
    } else {
      InferenceFailure::Inference { stage, source: err }
    }
  }

  /// 出错时请求所处的阶段
  pub fn stage(&self) -> RequestStage {
    match self {
      InferenceFailure::Preprocess(_) => RequestStage::Preprocessing,
      InferenceFailure::ModelLoad(_) => RequestStage::AwaitingSession,
      InferenceFailure::Inference { stage, .. } => *stage,
    }
  }
}

/// 检测入口：预处理 -> 推理 -> 解码
pub struct Detector<S, L: EngineLoader> {
  preprocessor: DetectorPreprocessor,
  session: Arc<SessionManager<S, L>>,
  decoder: DetectionDecoder,
  requests: AtomicU64,
}

pub type OnnxDetector = Detector<FileModelSource, OnnxLoader>;

impl<S: ModelSource, L: EngineLoader> Detector<S, L> {
  pub fn new(session: Arc<SessionManager<S, L>>, labels: Arc<LabelTable>) -> Self {
    Self {
      preprocessor: DetectorPreprocessor::default(),
      session,
      decoder: DetectionDecoder::new(labels),
      requests: AtomicU64::new(0),
    }
  }

  pub fn preprocessor(mut self, preprocessor: DetectorPreprocessor) -> Self {
    self.preprocessor = preprocessor;
    self
  }

  pub fn decoder(mut self, decoder: DetectionDecoder) -> Self {
    self.decoder = decoder;
    self
  }

  pub fn status(&self) -> SessionStatus {
    self.session.status()
  }

  /// 启动时预先加载模型
  pub fn warm_up(&self) -> Result<(), InferenceFailure> {
    info!("预热模型");
    self
      .session
      .ensure_ready()
      .map_err(|e| InferenceFailure::from_session(RequestStage::AwaitingSession, e))
  }

  /// 进程退出时调用，可重复调用
  pub fn release(&self) {
    self.session.release();
  }

  pub fn detect_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Detection>, InferenceFailure> {
    self.detect(ImageSource::from(path.as_ref()))
  }

  pub fn detect_bytes(&self, bytes: &[u8]) -> Result<Vec<Detection>, InferenceFailure> {
    self.detect(ImageSource::from(bytes))
  }

  pub fn detect(&self, source: ImageSource<'_>) -> Result<Vec<Detection>, InferenceFailure> {
    let request = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
    let span = info_span!("detect", request);
    let _enter = span.enter();

    let now = Instant::now();
    debug!("阶段: {}", RequestStage::Received);
    match self.pipeline(source) {
      Ok(detections) => {
        info!(
          "检测完成: {} 个结果，耗时: {:.2?}",
          detections.len(),
          now.elapsed()
        );
        debug!("阶段: {}", RequestStage::Completed);
        Ok(detections)
      }
      Err(e) => {
        warn!("检测失败于 {} 阶段: {}", e.stage(), e);
        debug!("阶段: {}", RequestStage::Failed);
        Err(e)
      }
    }
  }

  fn pipeline(&self, source: ImageSource<'_>) -> Result<Vec<Detection>, InferenceFailure> {
    debug!("阶段: {}", RequestStage::Preprocessing);
    let now = Instant::now();
    let tensor = self.preprocessor.preprocess(source)?;
    debug!("预处理完成，耗时: {:.2?}", now.elapsed());

    // 会话可能在两次请求之间被释放，每次推理前都确认一次
    debug!("阶段: {}", RequestStage::AwaitingSession);
    self
      .session
      .ensure_ready()
      .map_err(|e| InferenceFailure::from_session(RequestStage::AwaitingSession, e))?;

    debug!("阶段: {}", RequestStage::Running);
    let now = Instant::now();
    let output = self
      .session
      .run(&tensor)
      .map_err(|e| InferenceFailure::from_session(RequestStage::Running, e))?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    debug!("阶段: {}", RequestStage::Decoding);
    Ok(self.decoder.decode(&output))
  }
}
