// 该文件是 Kanmen （看门） 项目的一部分。
// src/model.rs - 检测模型
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

use std::sync::{Mutex, PoisonError};

use image::RgbImage;

mod yolo;
pub use self::yolo::{YoloDetector, YoloError};

/// 检测结果中的单个目标
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl FromIterator<DetectItem> for DetectResult {
  fn from_iter<I: IntoIterator<Item = DetectItem>>(iter: I) -> Self {
    DetectResult {
      items: iter.into_iter().collect(),
    }
  }
}

/// 类别与置信度过滤条件
#[derive(Debug, Clone, PartialEq)]
pub struct DetectFilter {
  /// 只保留这些类别，`None` 表示全部类别
  pub classes: Option<Vec<u32>>,
  pub confidence: f32,
}

impl DetectFilter {
  pub fn all(confidence: f32) -> Self {
    DetectFilter {
      classes: None,
      confidence,
    }
  }

  pub fn only(classes: &[u32], confidence: f32) -> Self {
    DetectFilter {
      classes: Some(classes.to_vec()),
      confidence,
    }
  }

  pub fn accepts(&self, class_id: u32, score: f32) -> bool {
    score >= self.confidence
      && self
        .classes
        .as_ref()
        .is_none_or(|classes| classes.contains(&class_id))
  }
}

/// 检测后端
///
/// 实现必须可以在多个线程间共享；不可重入的后端用 [`Serialized`] 包装。
pub trait Detector: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&self, image: &RgbImage, filter: &DetectFilter) -> Result<DetectResult, Self::Error>;

  /// 类别名称，用于标注
  fn label(&self, class_id: u32) -> String {
    format!("class{}", class_id)
  }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  type Error = D::Error;

  fn detect(&self, image: &RgbImage, filter: &DetectFilter) -> Result<DetectResult, Self::Error> {
    (**self).detect(image, filter)
  }

  fn label(&self, class_id: u32) -> String {
    (**self).label(class_id)
  }
}

/// 通过互斥锁串行化调用的检测后端
pub struct Serialized<D> {
  inner: Mutex<D>,
}

impl<D> Serialized<D> {
  pub fn new(inner: D) -> Self {
    Serialized {
      inner: Mutex::new(inner),
    }
  }
}

impl<D: Detector> Detector for Serialized<D> {
  type Error = D::Error;

  fn detect(&self, image: &RgbImage, filter: &DetectFilter) -> Result<DetectResult, Self::Error> {
    let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    inner.detect(image, filter)
  }

  fn label(&self, class_id: u32) -> String {
    let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    inner.label(class_id)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
  };

  use super::*;

  #[derive(Default)]
  struct DeviceStats {
    running: AtomicUsize,
    peak: AtomicUsize,
  }

  struct SlowDetector(Arc<DeviceStats>);

  impl Detector for SlowDetector {
    type Error = std::io::Error;

    fn detect(&self, _: &RgbImage, _: &DetectFilter) -> Result<DetectResult, Self::Error> {
      let now = self.0.running.fetch_add(1, Ordering::SeqCst) + 1;
      self.0.peak.fetch_max(now, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(50));
      self.0.running.fetch_sub(1, Ordering::SeqCst);
      Ok(DetectResult::default())
    }
  }

  fn run_concurrently<D: Detector + 'static>(detector: Arc<D>) {
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let detector = detector.clone();
        thread::spawn(move || {
          detector
            .detect(&RgbImage::new(2, 2), &DetectFilter::all(0.5))
            .unwrap();
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }
  }

  #[test]
  fn serialized_runs_one_at_a_time() {
    let stats = Arc::new(DeviceStats::default());
    run_concurrently(Arc::new(Serialized::new(SlowDetector(stats.clone()))));
    assert_eq!(stats.peak.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn reentrant_detector_runs_in_parallel() {
    let stats = Arc::new(DeviceStats::default());
    run_concurrently(Arc::new(SlowDetector(stats.clone())));
    assert!(stats.peak.load(Ordering::SeqCst) > 1);
  }

  #[test]
  fn filter_accepts() {
    let humans = DetectFilter::only(&[0], 0.5);
    assert!(humans.accepts(0, 0.5));
    assert!(!humans.accepts(0, 0.49));
    assert!(!humans.accepts(1, 0.9));

    let any = DetectFilter::all(0.25);
    assert!(any.accepts(7, 0.3));
  }
}
