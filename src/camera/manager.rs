// 该文件是 Kanmen （看门） 项目的一部分。
// src/camera/manager.rs - 共享摄像头流管理器
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
  sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CameraDevice, CameraError, CameraSource, DeviceOpener};
use crate::frame::Frame;

/// 流会话令牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(Uuid);

impl StreamId {
  fn new() -> Self {
    StreamId(Uuid::new_v4())
  }
}

impl fmt::Display for StreamId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

#[derive(Default)]
struct Slot {
  device: Option<Box<dyn CameraDevice>>,
  source: Option<CameraSource>,
  active: Option<StreamId>,
}

impl Slot {
  fn release_device(&mut self) {
    if let Some(source) = self.source.take() {
      info!("释放摄像头: {}", source);
    }
    self.device = None;
  }

  fn clear(&mut self) {
    self.release_device();
    self.active = None;
  }
}

/// 摄像头流管理器
///
/// 进程内唯一的摄像头持有者。任意时刻至多一个活动会话，
/// 新的 [`start_stream`](Self::start_stream) 会立即取代旧会话；
/// 被取代的令牌之后的所有读取都返回 `None`。
///
/// 所有操作（包括读帧）都在同一把锁内完成，
/// 因此被取代的会话不可能拿到取代之后采集的帧。
pub struct StreamManager {
  opener: Box<dyn DeviceOpener>,
  slot: Mutex<Slot>,
}

impl StreamManager {
  pub fn new<O: DeviceOpener + 'static>(opener: O) -> Self {
    StreamManager {
      opener: Box::new(opener),
      slot: Mutex::new(Slot::default()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Slot> {
    // 设备读取 panic 不应让整个服务失去摄像头
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 开始新的流会话并确保设备已在 `source` 上打开
  ///
  /// 同一来源且设备仍可用时复用设备，否则释放旧设备并重新打开。
  /// 打开失败时不保留设备，也不保留活动会话。
  pub fn start_stream(&self, source: &CameraSource) -> Result<StreamId, CameraError> {
    let mut slot = self.lock();
    let id = StreamId::new();
    if let Some(previous) = slot.active.replace(id) {
      info!("流会话 {} 被新会话 {} 取代", previous, id);
    }

    let reusable = slot.source.as_ref() == Some(source)
      && slot.device.as_ref().is_some_and(|device| device.is_open());
    if reusable {
      debug!("复用已打开的摄像头: {}", source);
      return Ok(id);
    }

    slot.release_device();
    match self.opener.open(source) {
      Ok(device) => {
        slot.device = Some(device);
        slot.source = Some(source.clone());
        info!("流会话 {} 已开始, 来源: {}", id, source);
        Ok(id)
      }
      Err(e) => {
        warn!("无法打开摄像头 {}: {}", source, e);
        slot.active = None;
        Err(match e {
          CameraError::DeviceUnavailable { .. } => e,
          other => CameraError::DeviceUnavailable {
            location: source.to_string(),
            reason: other.to_string(),
          },
        })
      }
    }
  }

  /// 为活动会话读取一帧
  ///
  /// 令牌不是活动会话、设备不可用或读取失败时返回 `None`，不会等待。
  pub fn get_frame(&self, id: StreamId) -> Option<Frame> {
    let mut slot = self.lock();
    if slot.active != Some(id) {
      return None;
    }
    let device = slot.device.as_mut().filter(|device| device.is_open())?;
    match device.read_frame() {
      Ok(frame) => Some(frame),
      Err(e) => {
        debug!("流会话 {} 读帧失败: {}", id, e);
        None
      }
    }
  }

  /// 结束会话；只有活动会话才会释放设备
  pub fn stop_stream(&self, id: StreamId) {
    let mut slot = self.lock();
    if slot.active == Some(id) {
      info!("流会话 {} 已结束", id);
      slot.clear();
    } else {
      debug!("忽略非活动会话 {} 的结束请求", id);
    }
  }

  /// 无条件释放设备并清除活动会话
  pub fn force_release(&self) {
    let mut slot = self.lock();
    if let Some(id) = slot.active {
      info!("强制结束流会话 {}", id);
    }
    slot.clear();
  }

  pub fn is_active(&self, id: StreamId) -> bool {
    self.lock().active == Some(id)
  }

  pub fn active_stream(&self) -> Option<StreamId> {
    self.lock().active
  }

  pub fn current_source(&self) -> Option<CameraSource> {
    self.lock().source.clone()
  }
}
