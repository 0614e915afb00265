// 该文件是 Kanmen （看门） 项目的一部分。
// src/pipeline/strategy.rs - 推理策略
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

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;

use super::PipelineError;
use crate::{
  model::{DetectFilter, DetectResult, Detector},
  output::draw::{self, Draw},
  record::{CombinedRecord, DetectionCount, DetectionRecord, WithCount},
};

/// 人员模型只保留 COCO 的 person 类别
pub const HUMAN_CLASSES: [u32; 1] = [0];

/// 对一帧运行推理并返回标注后的图像
pub trait Inference: Send + Sync {
  type Record: DetectionCount + WithCount + Serialize + Clone + Send + 'static;

  fn infer(
    &self,
    image: &RgbImage,
    confidence: f32,
  ) -> Result<(RgbImage, Self::Record), PipelineError>;
}

fn detect<D: Detector + ?Sized>(
  detector: &D,
  image: &RgbImage,
  filter: &DetectFilter,
) -> Result<DetectResult, PipelineError> {
  detector
    .detect(image, filter)
    .map_err(|e| PipelineError::Detection(e.to_string()))
}

/// 单模型策略，按类别着色，标签使用模型的类别名称
pub struct SingleModel<D: ?Sized> {
  detector: Arc<D>,
  classes: Option<Vec<u32>>,
  draw: Arc<Draw>,
}

impl<D: Detector + ?Sized> SingleModel<D> {
  pub fn new(detector: Arc<D>, draw: Arc<Draw>) -> Self {
    SingleModel {
      detector,
      classes: None,
      draw,
    }
  }

  /// 人员检测：只保留 person 类别
  pub fn human(detector: Arc<D>, draw: Arc<Draw>) -> Self {
    SingleModel::new(detector, draw).with_classes(&HUMAN_CLASSES)
  }

  pub fn with_classes(mut self, classes: &[u32]) -> Self {
    self.classes = Some(classes.to_vec());
    self
  }

  fn filter(&self, confidence: f32) -> DetectFilter {
    DetectFilter {
      classes: self.classes.clone(),
      confidence,
    }
  }
}

impl<D: Detector + ?Sized> Inference for SingleModel<D> {
  type Record = DetectionRecord;

  fn infer(
    &self,
    image: &RgbImage,
    confidence: f32,
  ) -> Result<(RgbImage, Self::Record), PipelineError> {
    let result = detect(self.detector.as_ref(), image, &self.filter(confidence))?;
    let mut annotated = image.clone();
    self.draw.draw_detections(&mut annotated, &result, |item| {
      (self.detector.label(item.class_id), draw::palette(item.class_id))
    });
    Ok((annotated, DetectionRecord::from(&result)))
  }
}

/// 双模型策略：每帧同时运行人员与工牌模型，结果画在同一张图上
pub struct DualModel<H: ?Sized, B: ?Sized> {
  human: Arc<H>,
  badge: Arc<B>,
  draw: Arc<Draw>,
}

impl<H: Detector + ?Sized, B: Detector + ?Sized> DualModel<H, B> {
  pub fn new(human: Arc<H>, badge: Arc<B>, draw: Arc<Draw>) -> Self {
    DualModel { human, badge, draw }
  }
}

impl<H: Detector + ?Sized, B: Detector + ?Sized> Inference for DualModel<H, B> {
  type Record = CombinedRecord;

  fn infer(
    &self,
    image: &RgbImage,
    confidence: f32,
  ) -> Result<(RgbImage, Self::Record), PipelineError> {
    let humans = detect(
      self.human.as_ref(),
      image,
      &DetectFilter::only(&HUMAN_CLASSES, confidence),
    )?;
    let badges = detect(self.badge.as_ref(), image, &DetectFilter::all(confidence))?;

    let mut annotated = image.clone();
    self.draw.draw_detections(&mut annotated, &humans, |_| {
      ("Person".to_string(), draw::GREEN)
    });
    self.draw.draw_detections(&mut annotated, &badges, |_| {
      ("Badge".to_string(), draw::BLUE)
    });

    let record = CombinedRecord::new(
      DetectionRecord::from(&humans),
      DetectionRecord::from(&badges),
    );
    Ok((annotated, record))
  }
}
