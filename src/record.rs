// 该文件是 Kanmen （看门） 项目的一部分。
// src/record.rs - 检测结果记录
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

use serde::{Deserialize, Serialize};

use crate::model::DetectResult;

/// 一帧的检测记录，三个数组按下标一一对应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  pub boxes_xyxy: Vec<[f32; 4]>,
  pub classes: Vec<f32>,
  pub confidence: Vec<f32>,
}

impl DetectionRecord {
  pub fn count(&self) -> usize {
    self.boxes_xyxy.len()
  }

  pub fn counted(self) -> CountedDetections {
    CountedDetections::from(self)
  }
}

impl From<&DetectResult> for DetectionRecord {
  fn from(result: &DetectResult) -> Self {
    let mut record = DetectionRecord {
      boxes_xyxy: Vec::with_capacity(result.len()),
      classes: Vec::with_capacity(result.len()),
      confidence: Vec::with_capacity(result.len()),
    };
    for item in result.items.iter() {
      record.boxes_xyxy.push(item.bbox);
      record.classes.push(item.class_id as f32);
      record.confidence.push(item.score);
    }
    record
  }
}

/// 带计数的检测记录，用于流和快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountedDetections {
  #[serde(flatten)]
  pub record: DetectionRecord,
  pub count: usize,
}

impl From<DetectionRecord> for CountedDetections {
  fn from(record: DetectionRecord) -> Self {
    let count = record.count();
    CountedDetections { record, count }
  }
}

/// 人员与工牌的合并记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRecord {
  pub humans: CountedDetections,
  pub badges: CountedDetections,
  pub total_count: usize,
}

impl CombinedRecord {
  pub fn new(humans: DetectionRecord, badges: DetectionRecord) -> Self {
    let humans = humans.counted();
    let badges = badges.counted();
    let total_count = humans.count + badges.count;
    CombinedRecord {
      humans,
      badges,
      total_count,
    }
  }
}

/// 记录中的目标总数
pub trait DetectionCount {
  fn total(&self) -> usize;
}

impl DetectionCount for DetectionRecord {
  fn total(&self) -> usize {
    self.count()
  }
}

impl DetectionCount for CountedDetections {
  fn total(&self) -> usize {
    self.count
  }
}

impl DetectionCount for CombinedRecord {
  fn total(&self) -> usize {
    self.total_count
  }
}

/// 流和快照响应使用带计数的记录形式
pub trait WithCount {
  type Counted: Serialize + Send + 'static;
  fn with_count(self) -> Self::Counted;
}

impl WithCount for DetectionRecord {
  type Counted = CountedDetections;

  fn with_count(self) -> Self::Counted {
    self.counted()
  }
}

impl WithCount for CombinedRecord {
  type Counted = CombinedRecord;

  fn with_count(self) -> Self::Counted {
    self
  }
}
