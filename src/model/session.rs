// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/model/session.rs - 推理会话生命周期管理
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

//! 会话状态机：`Uninitialized -> Loading -> Ready -> Released`。
//!
//! 同一时刻最多只有一个线程在加载模型，其余调用者在条件变量上等待并共享
//! 加载结果。加载失败时回到 `Uninitialized`，下一次调用会重新加载。
//! 推理引擎的 `run` 需要可变借用，因此 `Ready` 状态下的引擎放在互斥锁中，
//! 推理调用串行执行；等待加载的线程只持有状态锁，不会被推理阻塞。

use std::{
  fmt,
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::AsNchwTensor,
  model::{EngineLoader, InferenceEngine, ModelSource, RawOutput},
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("模型文件读取错误 ({path}): {source}")]
  ModelRead {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("模型无效: {0}")]
  ModelInvalid(#[source] BoxError),
  #[error("模型加载失败: {0}")]
  LoadFailed(Arc<str>),
  #[error("会话未就绪")]
  NotReady,
  #[error("会话已释放")]
  Released,
  #[error("输入形状 {shape:?} 与数据长度 {len} 不符")]
  ShapeMismatch { shape: [usize; 4], len: usize },
  #[error("推理执行错误: {0}")]
  RunError(#[source] BoxError),
}

impl SessionError {
  /// 模型文件缺失或损坏，状态已回退，允许重试
  pub fn is_load_error(&self) -> bool {
    matches!(
      self,
      SessionError::ModelRead { .. } | SessionError::ModelInvalid(_) | SessionError::LoadFailed(_)
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
  Uninitialized,
  Loading,
  Ready,
  Released,
}

impl fmt::Display for SessionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SessionStatus::Uninitialized => "uninitialized",
      SessionStatus::Loading => "loading",
      SessionStatus::Ready => "ready",
      SessionStatus::Released => "released",
    };
    f.write_str(name)
  }
}

enum SessionState<E> {
  Uninitialized,
  Loading,
  // 释放时取出引擎，仍持有 Arc 的推理线程随后看到 None
  Ready(Arc<Mutex<Option<E>>>),
  Released,
}

struct SessionSlot<E> {
  state: SessionState<E>,
  // 每完成一次加载尝试加一，等待者据此判断自己等到的那次加载是否失败
  attempts: u64,
  last_failure: Option<Arc<str>>,
}

impl<E> SessionSlot<E> {
  fn status(&self) -> SessionStatus {
    match self.state {
      SessionState::Uninitialized => SessionStatus::Uninitialized,
      SessionState::Loading => SessionStatus::Loading,
      SessionState::Ready(_) => SessionStatus::Ready,
      SessionState::Released => SessionStatus::Released,
    }
  }
}

/// 进程内唯一的推理会话
pub struct SessionManager<S, L: EngineLoader> {
  source: S,
  loader: L,
  slot: Mutex<SessionSlot<L::Engine>>,
  loaded: Condvar,
}

impl<S: ModelSource, L: EngineLoader> SessionManager<S, L> {
  pub fn new(source: S, loader: L) -> Self {
    Self {
      source,
      loader,
      slot: Mutex::new(SessionSlot {
        state: SessionState::Uninitialized,
        attempts: 0,
        last_failure: None,
      }),
      loaded: Condvar::new(),
    }
  }

  pub fn status(&self) -> SessionStatus {
    self.lock_slot().status()
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  fn lock_slot(&self) -> MutexGuard<'_, SessionSlot<L::Engine>> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 确保模型已加载；并发调用只会触发一次加载
  pub fn ensure_ready(&self) -> Result<(), SessionError> {
    let mut slot = self.lock_slot();
    let attempts = slot.attempts;
    loop {
      match slot.status() {
        SessionStatus::Ready => return Ok(()),
        SessionStatus::Released => return Err(SessionError::Released),
        SessionStatus::Loading => {
          debug!("模型正在加载，等待加载完成");
          slot = self
            .loaded
            .wait(slot)
            .unwrap_or_else(PoisonError::into_inner);
        }
        SessionStatus::Uninitialized if slot.attempts != attempts => {
          // 等到的那次加载失败了，共享其结果而不是再次加载
          let failure = slot
            .last_failure
            .clone()
            .unwrap_or_else(|| Arc::from("未知错误"));
          return Err(SessionError::LoadFailed(failure));
        }
        SessionStatus::Uninitialized => break,
      }
    }
    slot.state = SessionState::Loading;
    drop(slot);

    let mut guard = LoadingGuard {
      slot: &self.slot,
      loaded: &self.loaded,
      armed: true,
    };
    let result = self.load();
    guard.armed = false;

    let mut slot = self.lock_slot();
    slot.attempts += 1;
    let outcome = match result {
      Ok(engine) if matches!(slot.state, SessionState::Released) => {
        warn!("模型加载期间会话已被释放，丢弃新建的会话");
        release_engine(engine);
        Err(SessionError::Released)
      }
      Ok(engine) => {
        slot.state = SessionState::Ready(Arc::new(Mutex::new(Some(engine))));
        slot.last_failure = None;
        Ok(())
      }
      Err(e) => {
        error!("模型加载失败: {}", e);
        if !matches!(slot.state, SessionState::Released) {
          slot.state = SessionState::Uninitialized;
        }
        slot.last_failure = Some(Arc::from(e.to_string()));
        Err(e)
      }
    };
    drop(slot);
    self.loaded.notify_all();
    outcome
  }

  fn load(&self) -> Result<L::Engine, SessionError> {
    let path = self.source.describe();
    info!("加载模型文件: {}", path);
    let now = Instant::now();
    let model = self
      .source
      .read_model()
      .map_err(|source| SessionError::ModelRead {
        path: path.clone(),
        source,
      })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建推理会话");
    let engine = self
      .loader
      .load(&model)
      .map_err(|e| SessionError::ModelInvalid(Box::new(e)))?;
    info!("模型加载完成，耗时: {:.2?}", now.elapsed());
    Ok(engine)
  }

  /// 执行一次推理，要求会话处于 `Ready` 状态
  pub fn run<T: AsNchwTensor>(&self, tensor: &T) -> Result<RawOutput, SessionError> {
    let shape = tensor.shape();
    let input = tensor.as_nchw();
    if shape.iter().product::<usize>() != input.len() {
      return Err(SessionError::ShapeMismatch {
        shape,
        len: input.len(),
      });
    }

    let engine = match &self.lock_slot().state {
      SessionState::Ready(engine) => Arc::clone(engine),
      SessionState::Released => return Err(SessionError::Released),
      SessionState::Uninitialized | SessionState::Loading => return Err(SessionError::NotReady),
    };

    let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(engine) = engine.as_mut() else {
      return Err(SessionError::Released);
    };
    debug!("执行模型推理");
    let output = engine
      .run(shape, input)
      .map_err(|e| SessionError::RunError(Box::new(e)))?;
    Ok(RawOutput::from(output))
  }

  /// 释放会话，可重复调用
  pub fn release(&self) {
    let previous = {
      let mut slot = self.lock_slot();
      std::mem::replace(&mut slot.state, SessionState::Released)
    };
    // 唤醒可能仍在等待加载的线程，让它们看到 Released
    self.loaded.notify_all();

    match previous {
      SessionState::Ready(engine) => {
        // 等待进行中的推理结束后再取出引擎
        let engine = engine
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .take();
        if let Some(engine) = engine {
          release_engine(engine);
          info!("推理会话已释放");
        }
      }
      SessionState::Loading => info!("模型加载中，会话将在加载结束后释放"),
      SessionState::Uninitialized => debug!("会话尚未创建，无需释放"),
      SessionState::Released => debug!("会话已释放，忽略重复释放"),
    }
  }
}

fn release_engine<E: InferenceEngine>(engine: E) {
  if let Err(e) = engine.release() {
    error!("释放推理会话失败: {}", e);
  }
}

/// 加载线程异常退出时将状态恢复为 `Uninitialized`
struct LoadingGuard<'a, E> {
  slot: &'a Mutex<SessionSlot<E>>,
  loaded: &'a Condvar,
  armed: bool,
}

impl<E> Drop for LoadingGuard<'_, E> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    slot.attempts += 1;
    if matches!(slot.state, SessionState::Loading) {
      slot.state = SessionState::Uninitialized;
    }
    slot.last_failure = Some(Arc::from("模型加载线程异常退出"));
    drop(slot);
    self.loaded.notify_all();
  }
}
