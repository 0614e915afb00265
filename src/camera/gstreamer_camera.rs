// 该文件是 Kanmen （看门） 项目的一部分。
// src/camera/gstreamer_camera.rs - GStreamer 摄像头
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

//! # GStreamer 摄像头
//!
//! 通过 GStreamer 管道采集摄像头或网络流，末端接 `appsink`，
//! 统一转换为 RGB。
//!
//! URL 形式：
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=15&format=YUY2`
//! - `gst://rtsp/192.168.1.100:8554/stream`
//!
//! 需要安装 GStreamer 开发库，并启用 `gstreamer_camera` 特性。

use std::collections::HashMap;

use gstreamer::{self as gst, ClockTime, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::{CameraDevice, CameraError};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum GStreamerCameraError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("No sample within timeout")]
  Timeout,
}

const GSTREAMER_SCHEME: &str = "gst";
const GSTREAMER_PULL_TIMEOUT_MS: u64 = 2000;

fn camera_pipeline(path: &str, query: &HashMap<String, String>) -> String {
  let mut source = format!("v4l2src device={}", path);
  if let Some(mode) = query.get("io-mode").and_then(|v| v.parse::<u32>().ok()) {
    source.push_str(&format!(" io-mode={}", mode));
  }

  let mut caps = vec!["video/x-raw".to_string()];
  if let Some(format) = query.get("format") {
    caps.push(format!("format={}", format));
  }
  for key in ["width", "height"] {
    if let Some(value) = query.get(key).and_then(|v| v.parse::<u32>().ok()) {
      caps.push(format!("{}={}", key, value));
    }
  }
  if let Some(fps) = query.get("fps").and_then(|v| v.parse::<u32>().ok()) {
    caps.push(format!("framerate={}/1", fps));
  }

  format!("{} ! {}", source, caps.join(","))
}

fn rtsp_pipeline(path: &str) -> String {
  // gst://rtsp/192.168.1.100:8554/stream 的路径部分即为 RTSP 地址
  format!("rtspsrc location=rtsp:/{} latency=0 ! decodebin", path)
}

/// GStreamer 摄像头
pub struct GStreamerCamera {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  open: bool,
}

impl GStreamerCamera {
  /// 从管道描述启动，描述末端会自动接上 RGB 转换和 appsink
  pub fn launch(description: &str) -> Result<Self, GStreamerCameraError> {
    gst::init()?;

    let full_pipeline = format!(
      "{} ! videoconvert ! video/x-raw,format=RGB ! appsink max-buffers=2 drop=true name=sink",
      description
    );
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerCameraError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerCameraError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerCameraError::AppSinkNotFound)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerCamera {
      pipeline,
      appsink,
      open: true,
    })
  }

  fn pull_frame(&mut self) -> Result<Frame, GStreamerCameraError> {
    if self.appsink.is_eos() {
      self.open = false;
      return Err(GStreamerCameraError::PipelineError("End of stream".to_string()));
    }
    let sample = self
      .appsink
      .try_pull_sample(ClockTime::from_mseconds(GSTREAMER_PULL_TIMEOUT_MS))
      .ok_or(GStreamerCameraError::Timeout)?;
    sample_to_rgb(&sample).map(Frame::new)
  }
}

impl Drop for GStreamerCamera {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl FromUrl for GStreamerCamera {
  type Error = GStreamerCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != GSTREAMER_SCHEME {
      return Err(GStreamerCameraError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let description = match url.host_str() {
      Some("camera") => camera_pipeline(url.path(), &query),
      Some("rtsp") => rtsp_pipeline(url.path()),
      _ => return Err(GStreamerCameraError::SchemeMismatch),
    };

    GStreamerCamera::launch(&description)
  }
}

impl FromUrlWithScheme for GStreamerCamera {
  const SCHEME: &'static str = GSTREAMER_SCHEME;
}

impl CameraDevice for GStreamerCamera {
  fn read_frame(&mut self) -> Result<Frame, CameraError> {
    Ok(self.pull_frame()?)
  }

  fn is_open(&self) -> bool {
    self.open
  }
}

fn sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerCameraError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerCameraError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerCameraError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerCameraError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerCameraError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerCameraError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected = stride * height.saturating_sub(1) + width * 3;
  if data.len() < expected {
    return Err(GStreamerCameraError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 行可能带有填充，按 stride 逐行拷贝
  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + width * 3]);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerCameraError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )
}
