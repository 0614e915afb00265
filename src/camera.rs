// 该文件是 Kanmen （看门） 项目的一部分。
// src/camera.rs - 摄像头设备与共享流管理
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

//! # 摄像头模块
//!
//! 物理摄像头在整个服务中只有一个，由 [`StreamManager`] 独占持有，
//! 并在并发的 HTTP 请求之间按“后到者优先”的规则复用。
//!
//! 摄像头来源 [`CameraSource`] 可以是：
//! - 设备序号，例如 `0` 对应 `/dev/video0`
//! - `v4l:///dev/video2?width=1280&height=720`（`v4l_camera` 特性）
//! - `image:///path/to/still.jpg`，把一张静态图片当作摄像头回放
//! - `gst://camera/dev/video0?width=640&height=480`（`gstreamer_camera` 特性）

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod image_file;
mod manager;

#[cfg(feature = "v4l_camera")]
mod v4l_camera;

#[cfg(feature = "gstreamer_camera")]
mod gstreamer_camera;

pub use self::image_file::{ImageFileCamera, ImageFileCameraError};
pub use self::manager::{StreamId, StreamManager};

#[cfg(feature = "v4l_camera")]
pub use self::v4l_camera::{V4lCamera, V4lCameraError};

#[cfg(feature = "gstreamer_camera")]
pub use self::gstreamer_camera::{GStreamerCamera, GStreamerCameraError};

#[derive(Error, Debug)]
pub enum CameraError {
  #[error("Cannot open camera source: {location}: {reason}")]
  DeviceUnavailable { location: String, reason: String },
  #[error("Invalid camera source: {0}")]
  InvalidSource(String),
  #[error("Unsupported camera scheme: {0}")]
  SchemeMismatch(String),
  #[error("Image file camera error: {0}")]
  ImageFile(#[from] ImageFileCameraError),
  #[cfg(feature = "v4l_camera")]
  #[error("V4L camera error: {0}")]
  V4l(#[from] V4lCameraError),
  #[cfg(feature = "gstreamer_camera")]
  #[error("GStreamer camera error: {0}")]
  GStreamer(#[from] GStreamerCameraError),
}

/// 摄像头来源：设备序号或 URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CameraSource {
  Index(u32),
  Url(Url),
}

impl CameraSource {
  /// 设备序号对应的 V4L2 设备路径
  pub fn device_path(index: u32) -> String {
    format!("/dev/video{}", index)
  }
}

impl Default for CameraSource {
  fn default() -> Self {
    CameraSource::Index(0)
  }
}

impl FromStr for CameraSource {
  type Err = CameraError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err(CameraError::InvalidSource(s.to_string()));
    }
    if let Ok(index) = s.parse::<u32>() {
      return Ok(CameraSource::Index(index));
    }
    // 裸设备路径按 v4l 处理
    let url = if s.starts_with('/') {
      Url::parse(&format!("v4l://{}", s))
    } else {
      Url::parse(s)
    };
    url
      .map(CameraSource::Url)
      .map_err(|e| CameraError::InvalidSource(format!("{}: {}", s, e)))
  }
}

impl fmt::Display for CameraSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CameraSource::Index(index) => write!(f, "{}", index),
      CameraSource::Url(url) => write!(f, "{}", url),
    }
  }
}

/// 已打开的摄像头设备
///
/// 设备被 drop 时释放底层资源。
pub trait CameraDevice: Send {
  /// 读取一帧；失败时返回错误，由调用方决定是否重试
  fn read_frame(&mut self) -> Result<Frame, CameraError>;

  /// 设备是否仍然可用
  fn is_open(&self) -> bool;
}

/// 根据来源打开摄像头设备
pub trait DeviceOpener: Send + Sync {
  fn open(&self, source: &CameraSource) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// 按编译特性分派到具体设备实现的打开器
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl SystemOpener {
  fn open_url(&self, url: &Url) -> Result<Box<dyn CameraDevice>, CameraError> {
    if url.scheme() == ImageFileCamera::SCHEME {
      return Ok(Box::new(ImageFileCamera::from_url(url)?));
    }
    #[cfg(feature = "v4l_camera")]
    {
      if url.scheme() == V4lCamera::SCHEME {
        return Ok(Box::new(V4lCamera::from_url(url)?));
      }
    }
    #[cfg(feature = "gstreamer_camera")]
    {
      if url.scheme() == GStreamerCamera::SCHEME {
        return Ok(Box::new(GStreamerCamera::from_url(url)?));
      }
    }
    error!("不支持的摄像头来源: {}", url);
    Err(CameraError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl DeviceOpener for SystemOpener {
  fn open(&self, source: &CameraSource) -> Result<Box<dyn CameraDevice>, CameraError> {
    info!("打开摄像头: {}", source);
    match source {
      #[cfg(feature = "v4l_camera")]
      CameraSource::Index(index) => Ok(Box::new(V4lCamera::open(
        &CameraSource::device_path(*index),
        None,
      )?)),
      #[cfg(not(feature = "v4l_camera"))]
      CameraSource::Index(index) => Err(CameraError::DeviceUnavailable {
        location: CameraSource::device_path(*index),
        reason: "V4L2 support is not enabled".to_string(),
      }),
      CameraSource::Url(url) => self.open_url(url),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_index_source() {
    assert_eq!("0".parse::<CameraSource>().unwrap(), CameraSource::Index(0));
    assert_eq!(" 2 ".parse::<CameraSource>().unwrap(), CameraSource::Index(2));
  }

  #[test]
  fn parse_url_and_device_path() {
    let source: CameraSource = "image:///tmp/door.jpg".parse().unwrap();
    match source {
      CameraSource::Url(url) => {
        assert_eq!(url.scheme(), "image");
        assert_eq!(url.path(), "/tmp/door.jpg");
      }
      other => panic!("unexpected source {:?}", other),
    }

    let source: CameraSource = "/dev/video1".parse().unwrap();
    match source {
      CameraSource::Url(url) => {
        assert_eq!(url.scheme(), "v4l");
        assert_eq!(url.path(), "/dev/video1");
      }
      other => panic!("unexpected source {:?}", other),
    }
  }

  #[test]
  fn reject_garbage_source() {
    assert!(matches!(
      "not a camera".parse::<CameraSource>(),
      Err(CameraError::InvalidSource(_))
    ));
    assert!("".parse::<CameraSource>().is_err());
    assert!("-1".parse::<CameraSource>().is_err());
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let source: CameraSource = "ftp://example.com/cam".parse().unwrap();
    assert!(matches!(
      SystemOpener.open(&source),
      Err(CameraError::SchemeMismatch(_))
    ));
  }
}
