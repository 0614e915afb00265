// 该文件是 Kanmen （看门） 项目的一部分。
// tests/common/mod.rs - 测试用摄像头与检测后端
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

#![allow(dead_code)]

use std::{
  io,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use image::{Rgb, RgbImage};

use kanmen::{
  camera::{CameraDevice, CameraError, CameraSource, DeviceOpener, StreamManager},
  frame::Frame,
  model::{DetectFilter, DetectItem, DetectResult, Detector},
};

/// 摄像头的共享计数器
#[derive(Default)]
pub struct DeviceStats {
  pub opened: AtomicUsize,
  pub released: AtomicUsize,
  pub reads: AtomicUsize,
  /// 前 N 次读取失败（模拟预热）
  pub warmup_failures: AtomicUsize,
  /// 所有读取都失败
  pub broken: AtomicBool,
  pub fail_open: AtomicBool,
}

impl DeviceStats {
  pub fn opened(&self) -> usize {
    self.opened.load(Ordering::SeqCst)
  }

  pub fn released(&self) -> usize {
    self.released.load(Ordering::SeqCst)
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  /// 当前持有的设备数
  pub fn held(&self) -> usize {
    self.opened() - self.released()
  }
}

pub fn test_image() -> RgbImage {
  RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]))
}

pub struct FakeDevice {
  stats: Arc<DeviceStats>,
}

impl CameraDevice for FakeDevice {
  fn read_frame(&mut self) -> Result<Frame, CameraError> {
    let count = self.stats.reads.fetch_add(1, Ordering::SeqCst) + 1;
    if self.stats.broken.load(Ordering::SeqCst)
      || count <= self.stats.warmup_failures.load(Ordering::SeqCst)
    {
      return Err(CameraError::InvalidSource("no frame yet".to_string()));
    }
    Ok(Frame::new(test_image()))
  }

  fn is_open(&self) -> bool {
    true
  }
}

impl Drop for FakeDevice {
  fn drop(&mut self) {
    self.stats.released.fetch_add(1, Ordering::SeqCst);
  }
}

pub struct FakeOpener {
  stats: Arc<DeviceStats>,
}

impl DeviceOpener for FakeOpener {
  fn open(&self, source: &CameraSource) -> Result<Box<dyn CameraDevice>, CameraError> {
    if self.stats.fail_open.load(Ordering::SeqCst) {
      return Err(CameraError::DeviceUnavailable {
        location: source.to_string(),
        reason: "no such device".to_string(),
      });
    }
    self.stats.opened.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(FakeDevice {
      stats: self.stats.clone(),
    }))
  }
}

pub fn manager() -> (Arc<StreamManager>, Arc<DeviceStats>) {
  let stats = Arc::new(DeviceStats::default());
  let manager = StreamManager::new(FakeOpener {
    stats: stats.clone(),
  });
  (Arc::new(manager), stats)
}

/// 返回固定检测结果的后端
pub struct FakeDetector {
  items: Vec<DetectItem>,
  pub calls: AtomicUsize,
  /// 每隔 N 次调用失败一次，0 表示不失败
  pub fail_every: usize,
}

impl FakeDetector {
  pub fn new(items: Vec<DetectItem>) -> Self {
    FakeDetector {
      items,
      calls: AtomicUsize::new(0),
      fail_every: 0,
    }
  }

  pub fn failing_every(mut self, n: usize) -> Self {
    self.fail_every = n;
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Detector for FakeDetector {
  type Error = io::Error;

  fn detect(&self, _image: &RgbImage, filter: &DetectFilter) -> Result<DetectResult, Self::Error> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if self.fail_every > 0 && call % self.fail_every == 0 {
      return Err(io::Error::other("backend hiccup"));
    }
    Ok(
      self
        .items
        .iter()
        .filter(|item| filter.accepts(item.class_id, item.score))
        .cloned()
        .collect(),
    )
  }
}

pub fn person(score: f32) -> DetectItem {
  DetectItem {
    class_id: 0,
    score,
    bbox: [4.0, 4.0, 30.0, 40.0],
  }
}

pub fn other(class_id: u32, score: f32) -> DetectItem {
  DetectItem {
    class_id,
    score,
    bbox: [10.0, 10.0, 20.0, 20.0],
  }
}
