// 该文件是 Kanmen （看门） 项目的一部分。
// src/camera/image_file.rs - 静态图片摄像头
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::{CameraDevice, CameraError};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum ImageFileCameraError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid file path in URI: {0}")]
  InvalidPath(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

const IMAGE_FILE_SCHEME: &str = "image";

/// 把一张静态图片当作摄像头，每次读取都返回同一帧
///
/// 用于演示和没有摄像头的环境，例如 `image:///srv/kanmen/door.jpg`。
pub struct ImageFileCamera {
  image: RgbImage,
}

impl ImageFileCamera {
  pub fn new(image: RgbImage) -> Self {
    ImageFileCamera { image }
  }
}

impl FromUrl for ImageFileCamera {
  type Error = ImageFileCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != IMAGE_FILE_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(ImageFileCameraError::SchemaMismatch);
    }

    let path = url
      .to_file_path()
      .map_err(|_| ImageFileCameraError::InvalidPath(url.to_string()))?;
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;
    info!(
      "载入静态图片摄像头: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileCamera::new(image.to_rgb8()))
  }
}

impl FromUrlWithScheme for ImageFileCamera {
  const SCHEME: &'static str = IMAGE_FILE_SCHEME;
}

impl CameraDevice for ImageFileCamera {
  fn read_frame(&mut self) -> Result<Frame, CameraError> {
    Ok(Frame::new(self.image.clone()))
  }

  fn is_open(&self) -> bool {
    true
  }
}
