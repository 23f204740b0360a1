// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/task.rs - 检测任务
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
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
  detector::{Detector, InferenceFailure},
  model::{Detection, EngineLoader, ModelSource},
};

pub trait Task<I>: Sized {
  type Output;
  type Error;
  fn run_task<S: ModelSource, L: EngineLoader>(
    self,
    detector: &Detector<S, L>,
    input: I,
  ) -> Result<Self::Output, Self::Error>;
}

/// 单张图像的检测报告，与上层接口的 `{"detected": [...]}` 保持一致
#[derive(Debug, Serialize)]
pub struct ImageReport {
  pub image: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detected: Option<Vec<Detection>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stage: Option<String>,
}

impl ImageReport {
  fn new(path: &Path, result: Result<Vec<Detection>, InferenceFailure>) -> Self {
    let image = path.display().to_string();
    match result {
      Ok(detections) => ImageReport {
        image,
        detected: Some(detections),
        error: None,
        stage: None,
      },
      Err(e) => ImageReport {
        image,
        detected: None,
        error: Some(e.to_string()),
        stage: Some(e.stage().to_string()),
      },
    }
  }

  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }
}

/// 并行检测一组图像，每张图像执行一次
#[derive(Debug)]
pub struct OneShotTask {
  jobs: usize,
  stop: Arc<AtomicBool>,
}

impl Default for OneShotTask {
  fn default() -> Self {
    Self {
      jobs: 1,
      stop: Arc::default(),
    }
  }
}

impl OneShotTask {
  pub fn with_jobs(mut self, jobs: usize) -> Self {
    self.jobs = jobs.max(1);
    self
  }

  /// 置位后不再领取新的图像，已开始的检测会正常完成
  pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = stop;
    self
  }
}

impl Task<Vec<PathBuf>> for OneShotTask {
  type Output = Vec<ImageReport>;
  type Error = std::convert::Infallible;

  fn run_task<S: ModelSource, L: EngineLoader>(
    self,
    detector: &Detector<S, L>,
    input: Vec<PathBuf>,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务: {} 张图像, {} 个工作线程", input.len(), self.jobs);
    let next = AtomicUsize::new(0);
    let reports: Mutex<Vec<Option<ImageReport>>> =
      Mutex::new(input.iter().map(|_| None).collect());

    thread::scope(|scope| {
      for _ in 0..self.jobs.min(input.len()) {
        scope.spawn(|| {
          loop {
            if self.stop.load(Ordering::SeqCst) {
              break;
            }
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(path) = input.get(index) else {
              break;
            };
            let report = ImageReport::new(path, detector.detect_path(path));
            reports.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(report);
          }
        });
      }
    });

    let reports = reports
      .into_inner()
      .unwrap_or_else(PoisonError::into_inner)
      .into_iter()
      .flatten()
      .collect::<Vec<_>>();
    if reports.len() < input.len() {
      warn!("任务中断，已完成 {}/{} 张图像", reports.len(), input.len());
    } else {
      info!("任务完成");
    }
    Ok(reports)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
  pub iterations: usize,
  pub detections: usize,
  pub average: Duration,
}

/// 对同一张图像重复检测，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  // 前两次包含模型加载与缓存预热，不计入平均值
  const WARM_UP_TIMES: usize = 2;

  pub fn new(times: usize) -> Self {
    Self {
      times: times.max(1),
    }
  }
}

impl Task<&Path> for RepeatShotTask {
  type Output = BenchmarkReport;
  type Error = InferenceFailure;

  fn run_task<S: ModelSource, L: EngineLoader>(
    self,
    detector: &Detector<S, L>,
    input: &Path,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut times = Vec::with_capacity(self.times);
    let mut detections = 0;
    for i in 0..self.times {
      let now = Instant::now();
      let result = detector.detect_path(input)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      detections = result.len();
      times.push(elapsed);
    }

    let measured = if times.len() > Self::WARM_UP_TIMES {
      &times[Self::WARM_UP_TIMES..]
    } else {
      &times[..]
    };
    let average = measured.iter().sum::<Duration>() / measured.len() as u32;
    warn!("平均推理时间: {:.2?}", average);

    Ok(BenchmarkReport {
      iterations: self.times,
      detections,
      average,
    })
  }
}
