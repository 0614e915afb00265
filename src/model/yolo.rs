// 该文件是 Kanmen （看门） 项目的一部分。
// src/model/yolo.rs - YOLOv8 ONNX 检测模型
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

use std::{collections::BTreeMap, path::PathBuf};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error, info};
use tract_onnx::prelude::*;
use url::Url;

use super::{DetectFilter, DetectItem, DetectResult, Detector};
use crate::{FromUrl, FromUrlWithScheme};

const YOLO_SCHEME: &str = "yolo";
const YOLO_DEFAULT_INPUT_SIZE: usize = 640;
const YOLO_DEFAULT_IOU_THRESH: f32 = 0.45;
const YOLO_MAX_DETECTIONS: usize = 300;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理错误: {0}")]
  Tract(#[from] TractError),
  #[error("模型输出形状无效: {0:?}")]
  InvalidOutputShape(Vec<usize>),
}

type YoloPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// YOLOv8 检测器，模型由 `tract` 加载
///
/// 运行计划不可变，每次推理分配独立状态，因此可以直接在线程间共享。
pub struct YoloDetector {
  plan: YoloPlan,
  input_size: usize,
  iou_thresh: f32,
  names: Vec<String>,
}

pub struct YoloBuilder {
  model_path: PathBuf,
  input_size: usize,
  iou_thresh: f32,
  names: Vec<String>,
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLO_SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLO_SCHEME
      )));
    }
    if url.path().is_empty() || url.path() == "/" {
      return Err(YoloError::ModelPathError("缺少模型文件路径".to_string()));
    }

    let model_path = url
      .to_file_path()
      .map_err(|_| YoloError::ModelPathError(format!("无法解析模型文件路径: {}", url)))?;

    let mut builder = YoloBuilder {
      model_path,
      input_size: YOLO_DEFAULT_INPUT_SIZE,
      iou_thresh: YOLO_DEFAULT_IOU_THRESH,
      names: Vec::new(),
    };

    // yolo:///models/badge.onnx?size=640&names=badge&iou=0.45
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          builder.input_size = value
            .parse()
            .map_err(|_| YoloError::ModelPathError(format!("无效的输入尺寸: {}", value)))?
        }
        "iou" => {
          builder.iou_thresh = value
            .parse()
            .map_err(|_| YoloError::ModelPathError(format!("无效的 IoU 阈值: {}", value)))?
        }
        "names" => {
          builder.names = value
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
        }
        other => debug!("忽略未知的模型参数: {}", other),
      }
    }

    Ok(builder)
  }
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = YOLO_SCHEME;
}

impl YoloBuilder {
  pub fn build(self) -> Result<YoloDetector, YoloError> {
    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)?
      .with_input_fact(0, f32::fact([1, 3, size, size]).into())?
      .into_optimized()?
      .into_runnable()?;
    info!("模型加载完成, 输入尺寸 {}x{}", size, size);

    Ok(YoloDetector {
      plan,
      input_size: size,
      iou_thresh: self.iou_thresh,
      names: self.names,
    })
  }
}

impl YoloDetector {
  pub fn from_url(url: &Url) -> Result<Self, YoloError> {
    YoloBuilder::from_url(url)?.build()
  }

  fn preprocess(&self, image: &RgbImage) -> Tensor {
    let size = self.input_size as u32;
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    tract_ndarray::Array4::from_shape_fn(
      (1, 3, self.input_size, self.input_size),
      |(_, c, y, x)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    )
    .into()
  }
}

impl Detector for YoloDetector {
  type Error = YoloError;

  fn detect(&self, image: &RgbImage, filter: &DetectFilter) -> Result<DetectResult, Self::Error> {
    debug!("设置模型输入 {}x{}", image.width(), image.height());
    let input = self.preprocess(image);

    debug!("执行模型推理");
    let outputs = self.plan.run(tvec!(input.into()))?;
    let view = outputs[0].to_array_view::<f32>()?;
    let shape = view.shape().to_vec();
    let layout = OutputLayout::from_shape(&shape).ok_or_else(|| {
      error!("模型输出形状无效: {:?}", shape);
      YoloError::InvalidOutputShape(shape.clone())
    })?;
    let data: Vec<f32> = view.iter().copied().collect();

    let scale = (
      image.width() as f32 / self.input_size as f32,
      image.height() as f32 / self.input_size as f32,
    );
    let candidates = layout.decode(
      &data,
      scale,
      (image.width() as f32, image.height() as f32),
      filter,
    );
    let items = non_max_suppression(candidates, self.iou_thresh);
    debug!("检测到 {} 个物体", items.len());

    Ok(items.into_iter().collect())
  }

  fn label(&self, class_id: u32) -> String {
    self
      .names
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| format!("class{}", class_id))
  }
}

/// 输出张量布局：`[1, 4 + nc, N]`，部分导出为 `[1, N, 4 + nc]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputLayout {
  channels: usize,
  anchors: usize,
  anchors_first: bool,
}

impl OutputLayout {
  fn from_shape(shape: &[usize]) -> Option<Self> {
    let (a, b) = match shape {
      [1, a, b] => (*a, *b),
      [a, b] => (*a, *b),
      _ => return None,
    };
    // 锚点数远多于通道数
    let (channels, anchors, anchors_first) = if a <= b { (a, b, false) } else { (b, a, true) };
    if channels <= 4 {
      return None;
    }
    Some(OutputLayout {
      channels,
      anchors,
      anchors_first,
    })
  }

  fn at(&self, data: &[f32], anchor: usize, channel: usize) -> f32 {
    if self.anchors_first {
      data[anchor * self.channels + channel]
    } else {
      data[channel * self.anchors + anchor]
    }
  }

  fn decode(
    &self,
    data: &[f32],
    scale: (f32, f32),
    limit: (f32, f32),
    filter: &DetectFilter,
  ) -> Vec<DetectItem> {
    let mut items = Vec::new();
    for anchor in 0..self.anchors {
      let (class_id, score) = (4..self.channels)
        .map(|c| ((c - 4) as u32, self.at(data, anchor, c)))
        .fold((0u32, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

      if !filter.accepts(class_id, score) {
        continue;
      }

      let cx = self.at(data, anchor, 0);
      let cy = self.at(data, anchor, 1);
      let w = self.at(data, anchor, 2);
      let h = self.at(data, anchor, 3);

      let bbox = [
        ((cx - w / 2.0) * scale.0).clamp(0.0, limit.0),
        ((cy - h / 2.0) * scale.1).clamp(0.0, limit.1),
        ((cx + w / 2.0) * scale.0).clamp(0.0, limit.0),
        ((cy + h / 2.0) * scale.1).clamp(0.0, limit.1),
      ];
      if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
        continue;
      }
      items.push(DetectItem {
        class_id,
        score,
        bbox,
      });
    }
    items
  }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix1 = a[0].max(b[0]);
  let iy1 = a[1].max(b[1]);
  let ix2 = a[2].min(b[2]);
  let iy2 = a[3].min(b[3]);
  let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  inter / (area_a + area_b - inter + 1e-6)
}

/// 按类别分别做非极大值抑制，结果按置信度降序
fn non_max_suppression(items: Vec<DetectItem>, iou_thresh: f32) -> Vec<DetectItem> {
  let mut by_class: BTreeMap<u32, Vec<DetectItem>> = BTreeMap::new();
  for item in items {
    by_class.entry(item.class_id).or_default().push(item);
  }

  let mut keep = Vec::new();
  for (_, mut group) in by_class {
    group.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<DetectItem> = Vec::with_capacity(group.len());
    for item in group {
      if kept.iter().all(|k| iou(&k.bbox, &item.bbox) <= iou_thresh) {
        kept.push(item);
      }
    }
    keep.extend(kept);
  }

  keep.sort_by(|a, b| b.score.total_cmp(&a.score));
  keep.truncate(YOLO_MAX_DETECTIONS);
  keep
}
