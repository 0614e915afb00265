// 该文件是 Kanmen （看门） 项目的一部分。
// src/pipeline.rs - 检测流水线
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

//! # 检测流水线
//!
//! 四种处理流程共用一个编排器，差别只在推理策略 [`Inference`]：
//!
//! - [`detect_image`]：上传图片，单次推理，不重试
//! - [`LiveStream`]：从共享摄像头逐帧推理，惰性、无界
//! - [`snapshot`]：读取一帧（带预热重试）后推理一次
//! - 合并流：[`LiveStream`] 搭配 [`DualModel`] 策略
//!
//! 摄像头会话由 [`SessionGuard`] 持有，任何退出路径都会结束会话。

use std::{fmt, sync::Arc, thread, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  camera::{CameraError, CameraSource, StreamId, StreamManager},
  codec::{self, CodecError},
  frame::Frame,
};

mod strategy;
pub use self::strategy::{DualModel, HUMAN_CLASSES, Inference, SingleModel};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("Invalid input: {0}")]
  InvalidInput(String),
  #[error("{0}")]
  DeviceUnavailable(String),
  #[error("Cannot read frame from camera")]
  NoFrameAvailable,
  #[error("Encoding failure: {0}")]
  EncodingFailure(String),
  #[error("Detection failure: {0}")]
  Detection(String),
  #[error("Internal error: {0}")]
  Internal(String),
}

impl From<CameraError> for PipelineError {
  fn from(err: CameraError) -> Self {
    PipelineError::DeviceUnavailable(err.to_string())
  }
}

impl From<CodecError> for PipelineError {
  fn from(err: CodecError) -> Self {
    match err {
      CodecError::Encode(_) => PipelineError::EncodingFailure(err.to_string()),
      _ => PipelineError::InvalidInput(err.to_string()),
    }
  }
}

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Acquiring,
  Streaming,
  Snapshot,
  Releasing,
  Done,
  Failed,
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PipelineState::Acquiring => "acquiring",
      PipelineState::Streaming => "streaming",
      PipelineState::Snapshot => "snapshot",
      PipelineState::Releasing => "releasing",
      PipelineState::Done => "done",
      PipelineState::Failed => "failed",
    };
    f.write_str(name)
  }
}

fn transition(state: &mut PipelineState, next: PipelineState) {
  debug!("流水线状态: {} -> {}", state, next);
  *state = next;
}

/// 标注后的 JPEG 以及对应的检测记录
#[derive(Debug, Clone, PartialEq)]
pub struct Annotated<R> {
  pub jpeg: Vec<u8>,
  pub record: R,
  /// 源图像的采集（或上传解码）时间
  pub captured_at: DateTime<Utc>,
}

/// 流水线公共参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
  pub confidence: f32,
  pub jpeg_quality: u8,
}

impl Default for DetectOptions {
  fn default() -> Self {
    DetectOptions {
      confidence: 0.5,
      jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
    }
  }
}

/// 快照的预热重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy {
      attempts: 5,
      delay: Duration::from_millis(100),
    }
  }
}

fn annotate<I: Inference + ?Sized>(
  inference: &I,
  frame: &Frame,
  options: &DetectOptions,
) -> Result<Annotated<I::Record>, PipelineError> {
  let (annotated, record) = inference.infer(frame.image(), options.confidence)?;
  let jpeg = codec::encode_jpeg(&annotated, options.jpeg_quality)?;
  Ok(Annotated {
    jpeg,
    record,
    captured_at: frame.captured_at(),
  })
}

/// 单张图片检测
pub fn detect_image<I: Inference + ?Sized>(
  inference: &I,
  data: &[u8],
  options: &DetectOptions,
) -> Result<Annotated<I::Record>, PipelineError> {
  let frame = Frame::new(codec::decode_upload(data)?);
  debug!("图片解码完成 {}x{}", frame.width(), frame.height());
  annotate(inference, &frame, options)
}

/// 持有一个流会话，drop 时结束会话
pub struct SessionGuard {
  manager: Arc<StreamManager>,
  id: StreamId,
}

impl SessionGuard {
  pub fn start(manager: Arc<StreamManager>, source: &CameraSource) -> Result<Self, PipelineError> {
    let id = manager.start_stream(source)?;
    Ok(SessionGuard { manager, id })
  }

  pub fn id(&self) -> StreamId {
    self.id
  }

  pub fn read(&self) -> Option<Frame> {
    self.manager.get_frame(self.id)
  }

  pub fn is_active(&self) -> bool {
    self.manager.is_active(self.id)
  }
}

impl Drop for SessionGuard {
  fn drop(&mut self) {
    self.manager.stop_stream(self.id);
  }
}

/// 摄像头快照：读取一帧后推理一次
pub fn snapshot<I: Inference + ?Sized>(
  manager: &Arc<StreamManager>,
  source: &CameraSource,
  inference: &I,
  options: &DetectOptions,
  retry: &RetryPolicy,
) -> Result<Annotated<I::Record>, PipelineError> {
  let mut state = PipelineState::Acquiring;
  let result = SessionGuard::start(manager.clone(), source).and_then(|guard| {
    transition(&mut state, PipelineState::Snapshot);
    let frame = (0..retry.attempts)
      .find_map(|attempt| {
        if attempt > 0 {
          debug!("快照第 {} 次读取", attempt + 1);
          thread::sleep(retry.delay);
        }
        guard.read()
      })
      .ok_or(PipelineError::NoFrameAvailable)?;
    let annotated = annotate(inference, &frame, options);
    transition(&mut state, PipelineState::Releasing);
    annotated
  });

  match &result {
    Ok(_) => transition(&mut state, PipelineState::Done),
    Err(e) => {
      warn!("快照失败: {}", e);
      transition(&mut state, PipelineState::Failed);
    }
  }
  result
}

/// 实时检测流
///
/// 每次 `next` 读取一帧并推理。会话被抢占时静默结束，
/// 读帧失败时记录告警后结束；单帧推理或编码失败则跳过该帧。
/// 流被 drop（例如客户端断开）时结束会话。
pub struct LiveStream<I: ?Sized> {
  guard: Option<SessionGuard>,
  inference: Arc<I>,
  options: DetectOptions,
  state: PipelineState,
  cancelled: Option<Box<dyn Fn() -> bool + Send>>,
  frames: u64,
}

impl<I: Inference + ?Sized> LiveStream<I> {
  pub fn start(
    manager: Arc<StreamManager>,
    source: &CameraSource,
    inference: Arc<I>,
    options: DetectOptions,
  ) -> Result<Self, PipelineError> {
    let mut state = PipelineState::Acquiring;
    let guard = SessionGuard::start(manager, source).inspect_err(|e| {
      error!("无法开始实时流: {}", e);
    })?;
    info!("实时流 {} 开始, 来源: {}", guard.id(), source);
    transition(&mut state, PipelineState::Streaming);

    Ok(LiveStream {
      guard: Some(guard),
      inference,
      options,
      state,
      cancelled: None,
      frames: 0,
    })
  }

  /// 设置外部取消条件，每帧检查一次
  pub fn with_cancel<F>(mut self, cancelled: F) -> Self
  where
    F: Fn() -> bool + Send + 'static,
  {
    self.cancelled = Some(Box::new(cancelled));
    self
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn id(&self) -> Option<StreamId> {
    self.guard.as_ref().map(SessionGuard::id)
  }

  fn finish(&mut self, next: PipelineState) {
    if let Some(guard) = self.guard.take() {
      transition(&mut self.state, PipelineState::Releasing);
      info!("实时流 {} 结束, 共 {} 帧", guard.id(), self.frames);
      drop(guard);
    }
    transition(&mut self.state, next);
  }
}

impl<I: Inference + ?Sized> Iterator for LiveStream<I> {
  type Item = Annotated<I::Record>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let guard = self.guard.as_ref()?;

      if self.cancelled.as_ref().is_some_and(|cancelled| cancelled()) {
        debug!("实时流 {} 已取消", guard.id());
        self.finish(PipelineState::Done);
        return None;
      }

      let Some(frame) = guard.read() else {
        if guard.is_active() {
          warn!("实时流 {} 无法读取帧", guard.id());
          self.finish(PipelineState::Failed);
        } else {
          info!("实时流 {} 已被新的会话取代", guard.id());
          self.finish(PipelineState::Done);
        }
        return None;
      };

      match annotate(self.inference.as_ref(), &frame, &self.options) {
        Ok(annotated) => {
          self.frames += 1;
          return Some(annotated);
        }
        Err(e) => warn!("跳过第 {} 帧: {}", self.frames + 1, e),
      }
    }
  }
}

impl<I: ?Sized> Drop for LiveStream<I> {
  fn drop(&mut self) {
    if let Some(guard) = self.guard.take() {
      debug!("实时流 {} 被丢弃", guard.id());
    }
  }
}
