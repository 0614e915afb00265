// 该文件是 Kanmen （看门） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像与检测记录
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

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, pipeline::Annotated};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URI 中的文件路径无效: {0}")]
  InvalidPath(String),
}

/// 把标注后的 JPEG 写入文件，检测记录写入同名的 `.json` 文件
pub struct SaveImageFileOutput {
  path: PathBuf,
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    SaveImageFileOutput { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn record_path(&self) -> PathBuf {
    self.path.with_extension("json")
  }
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let path = uri
      .to_file_path()
      .map_err(|_| SaveImageFileError::InvalidPath(uri.to_string()))?;
    Ok(SaveImageFileOutput::new(path))
  }
}

impl<R: Serialize> Render<R> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, annotated: &Annotated<R>) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&self.path, &annotated.jpeg)?;
    let record_path = self.record_path();
    std::fs::write(&record_path, serde_json::to_vec_pretty(&annotated.record)?)?;

    info!(
      "保存标注图像到文件: {}, 记录: {}",
      self.path.display(),
      record_path.display()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::DetectionRecord;

  #[test]
  fn writes_image_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested").join("door.jpg");
    let url = Url::parse(&format!("image://{}", target.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let annotated = Annotated {
      jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
      record: DetectionRecord {
        boxes_xyxy: vec![[1.0, 2.0, 3.0, 4.0]],
        classes: vec![0.0],
        confidence: vec![0.5],
      },
      captured_at: chrono::Utc::now(),
    };
    output.render_result(&annotated).unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), annotated.jpeg);
    let record: DetectionRecord =
      serde_json::from_slice(&std::fs::read(target.with_extension("json")).unwrap()).unwrap();
    assert_eq!(record, annotated.record);
  }

  #[test]
  fn rejects_other_scheme() {
    let url = Url::parse("file:///tmp/out.jpg").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
