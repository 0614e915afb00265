// 该文件是 Kanmen （看门） 项目的一部分。
// src/camera/v4l_camera.rs - V4L2 摄像头
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

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, video::Capture,
};

use super::{CameraDevice, CameraError};
use crate::{FromUrl, FromUrlWithScheme, codec, frame::Frame};

#[derive(Error, Debug)]
pub enum V4lCameraError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format")]
  UnsupportedPixelFormat,
  #[error("Frame decode error: {0}")]
  Decode(#[from] codec::CodecError),
}

const V4L_SCHEME: &str = "v4l";
const V4L_DEFAULT_DEVICE: &str = "/dev/video0";
const V4L_DEFAULT_SIZE: (u32, u32) = (640, 480);
const V4L_BUFFER_COUNT: u32 = 4;
const V4L_READ_TIMEOUT: Duration = Duration::from_secs(2);

// 按优先级尝试的像素格式
const V4L_PIXEL_FORMATS: [&[u8; 4]; 3] = [b"MJPG", b"YUYV", b"RGB3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
  Mjpeg,
  Yuyv,
  Rgb24,
}

impl PixelLayout {
  fn from_fourcc(fourcc: &FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"MJPG" => Some(PixelLayout::Mjpeg),
      b"YUYV" => Some(PixelLayout::Yuyv),
      b"RGB3" => Some(PixelLayout::Rgb24),
      _ => None,
    }
  }
}

/// V4L2 摄像头，使用内存映射缓冲区采集
pub struct V4lCamera {
  device_path: String,
  stream: Stream<'static>,
  // stream 持有设备句柄的引用计数，这里保留设备以便查询
  _device: Device,
  layout: PixelLayout,
  width: u32,
  height: u32,
  open: bool,
}

impl V4lCamera {
  /// 打开设备并协商像素格式，`size` 缺省为 640x480
  pub fn open(device_path: &str, size: Option<(u32, u32)>) -> Result<Self, V4lCameraError> {
    let (width, height) = size.unwrap_or(V4L_DEFAULT_SIZE);
    info!("打开 V4L2 设备: {} ({}x{})", device_path, width, height);
    let device = Device::with_path(device_path)?;

    let mut negotiated = None;
    for fourcc in V4L_PIXEL_FORMATS {
      let mut format = device.format()?;
      format.width = width;
      format.height = height;
      format.fourcc = FourCC::new(fourcc);
      let actual = device.set_format(&format)?;
      if actual.fourcc == format.fourcc {
        negotiated = Some(actual);
        break;
      }
      debug!("设备不支持像素格式 {}, 实际为 {}", format.fourcc, actual.fourcc);
    }

    let format = negotiated.ok_or_else(|| {
      error!("设备 {} 没有可用的像素格式", device_path);
      V4lCameraError::UnsupportedPixelFormat
    })?;
    let layout =
      PixelLayout::from_fourcc(&format.fourcc).ok_or(V4lCameraError::UnsupportedPixelFormat)?;
    info!(
      "V4L2 格式: {} {}x{}",
      format.fourcc, format.width, format.height
    );

    let mut stream = Stream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT)?;
    stream.set_timeout(V4L_READ_TIMEOUT);

    Ok(V4lCamera {
      device_path: device_path.to_string(),
      stream,
      _device: device,
      layout,
      width: format.width,
      height: format.height,
      open: true,
    })
  }

  fn capture(&mut self) -> Result<Frame, V4lCameraError> {
    let (buf, meta) = self.stream.next()?;
    let used = (meta.bytesused as usize).min(buf.len());
    let data = if used > 0 { &buf[..used] } else { buf };

    let image = match self.layout {
      PixelLayout::Mjpeg => codec::decode_rgb(data)?,
      PixelLayout::Yuyv => codec::yuyv_to_rgb(data, self.width, self.height)?,
      PixelLayout::Rgb24 => codec::rgb_from_raw(data, self.width, self.height)?,
    };
    Ok(Frame::new(image))
  }
}

impl FromUrl for V4lCamera {
  type Error = V4lCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != V4L_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        V4L_SCHEME,
        url.scheme()
      );
      return Err(V4lCameraError::SchemaMismatch);
    }

    // v4l:///dev/video0?width=1280&height=720
    let device_path = if url.path().is_empty() || url.path() == "/" {
      V4L_DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let mut width = None;
    let mut height = None;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => width = value.parse::<u32>().ok(),
        "height" => height = value.parse::<u32>().ok(),
        _ => {}
      }
    }

    V4lCamera::open(&device_path, width.zip(height))
  }
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = V4L_SCHEME;
}

impl CameraDevice for V4lCamera {
  fn read_frame(&mut self) -> Result<Frame, CameraError> {
    match self.capture() {
      Ok(frame) => Ok(frame),
      Err(V4lCameraError::IoError(e)) => {
        // 采集 I/O 出错后视为设备已断开，下次开始会话时重新打开
        warn!("V4L2 设备 {} 采集失败: {}", self.device_path, e);
        self.open = false;
        Err(V4lCameraError::IoError(e).into())
      }
      Err(e) => Err(e.into()),
    }
  }

  fn is_open(&self) -> bool {
    self.open
  }
}
