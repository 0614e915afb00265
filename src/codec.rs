// 该文件是 Kanmen （看门） 项目的一部分。
// src/codec.rs - 图像编解码与校验
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

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum CodecError {
  #[error("Empty image data")]
  Empty,
  #[error("Image decode error: {0}")]
  Decode(#[source] image::ImageError),
  #[error("Image has no content: all pixels are identical")]
  Uniform,
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("JPEG encode error: {0}")]
  Encode(#[source] image::ImageError),
}

/// 解码任意受支持格式的图像为 RGB
pub fn decode_rgb(data: &[u8]) -> Result<RgbImage, CodecError> {
  if data.is_empty() {
    return Err(CodecError::Empty);
  }
  let image = image::load_from_memory(data).map_err(CodecError::Decode)?;
  Ok(image.to_rgb8())
}

/// 解码上传的图像并拒绝空输入和纯色图像
pub fn decode_upload(data: &[u8]) -> Result<RgbImage, CodecError> {
  let image = decode_rgb(data)?;
  if is_uniform(&image) {
    debug!("拒绝纯色图像 {}x{}", image.width(), image.height());
    return Err(CodecError::Uniform);
  }
  Ok(image)
}

/// 图像是否所有像素都相同（包括零尺寸图像）
pub fn is_uniform(image: &RgbImage) -> bool {
  let mut pixels = image.pixels();
  match pixels.next() {
    Some(first) => pixels.all(|p| p == first),
    None => true,
  }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
    .encode_image(image)
    .map_err(CodecError::Encode)?;
  Ok(buffer)
}

/// YUYV (YUV 4:2:2) 转 RGB
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, CodecError> {
  let expected = (width * height * 2) as usize;
  if yuyv.len() < expected {
    return Err(CodecError::BufferSizeMismatch {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  for chunk in yuyv[..expected].chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb_from_raw(&rgb, width, height)
}

/// 紧密排列的 RGB24 缓冲区转图像
pub fn rgb_from_raw(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CodecError> {
  let expected = (width * height * 3) as usize;
  if data.len() < expected {
    return Err(CodecError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }
  RgbImage::from_raw(width, height, data[..expected].to_vec()).ok_or(
    CodecError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    },
  )
}
