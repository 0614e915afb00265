// 该文件是 Kanmen （看门） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::model::{DetectItem, DetectResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 3;
const BOX_THICKNESS: i32 = 2;

pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

// 按类别循环使用的颜色
const PALETTE: [[u8; 3]; 8] = [
  [0, 255, 0],
  [0, 0, 255],
  [255, 56, 56],
  [255, 157, 151],
  [255, 178, 29],
  [72, 249, 10],
  [0, 194, 255],
  [255, 55, 199],
];

pub fn palette(class_id: u32) -> [u8; 3] {
  PALETTE[class_id as usize % PALETTE.len()]
}

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 检测框与标签绘制
///
/// 没有配置字体时只画框，不画标签文字。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Draw {
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Draw {
  pub fn with_font(font: FontVec) -> Self {
    Draw {
      font: Some(font),
      ..Draw::default()
    }
  }

  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data)
      .map_err(|e| DrawError::InvalidFont(format!("{}: {}", path.display(), e)))?;
    info!("载入标注字体: {}", path.display());
    Ok(Draw::with_font(font))
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 画 2 像素宽的边框，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  pub fn draw_box(&self, image: &mut RgbImage, bbox: &[f32; 4], color: [u8; 3]) -> Option<Rect> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return None;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return None;
    }

    let rect = Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32);
    for t in 0..BOX_THICKNESS {
      let width = rect.width() as i32 - 2 * t;
      let height = rect.height() as i32 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let inner = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, inner, Rgb(color));
    }
    Some(rect)
  }

  /// 在框的上方画带背景的标签
  pub fn draw_label(&self, image: &mut RgbImage, rect: Rect, label: &str, color: [u8; 3]) {
    let Some(font) = self.font.as_ref() else {
      return;
    };
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, label);
    let label_w = text_w as i32 + 2 * LABEL_TEXT_HORIZONTAL_PADDING;
    let label_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    let label_x = rect.left().max(0);
    let label_y = if rect.top() >= label_h {
      rect.top() - label_h
    } else {
      // 框贴近顶部时放在框内
      rect.top()
    };

    let max_width = (image.width() as i32 - label_x).max(0);
    let width = label_w.min(max_width);
    if width <= 0 || label_h <= 0 {
      return;
    }

    let background = Rect::at(label_x, label_y).of_size(width as u32, label_h as u32);
    draw_filled_rect_mut(image, background, Rgb(color));
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x + LABEL_TEXT_HORIZONTAL_PADDING,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      label,
    );
  }

  pub fn draw_item(&self, image: &mut RgbImage, item: &DetectItem, name: &str, color: [u8; 3]) {
    if let Some(rect) = self.draw_box(image, &item.bbox, color) {
      let label = format!("{} {:.2}", name, item.score);
      self.draw_label(image, rect, &label, color);
    }
  }

  /// 绘制全部检测结果，`style` 给出每个目标的名称和颜色
  pub fn draw_detections<F>(&self, image: &mut RgbImage, result: &DetectResult, style: F)
  where
    F: Fn(&DetectItem) -> (String, [u8; 3]),
  {
    for item in result.items.iter() {
      let (name, color) = style(item);
      self.draw_item(image, item, &name, color);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn box_is_two_pixels_thick() {
    let draw = Draw::default();
    let mut image = RgbImage::new(20, 20);
    let rect = draw.draw_box(&mut image, &[2.0, 2.0, 12.0, 12.0], GREEN).unwrap();
    assert_eq!((rect.left(), rect.top()), (2, 2));

    assert_eq!(image.get_pixel(2, 5), &Rgb(GREEN));
    assert_eq!(image.get_pixel(3, 5), &Rgb(GREEN));
    assert_eq!(image.get_pixel(4, 5), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(12, 12), &Rgb(GREEN));
    assert_eq!(image.get_pixel(7, 7), &Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_are_clamped_to_image() {
    let draw = Draw::default();
    let mut image = RgbImage::new(10, 10);
    let rect = draw.draw_box(&mut image, &[-5.0, -5.0, 50.0, 50.0], BLUE).unwrap();
    assert_eq!((rect.left(), rect.top(), rect.right(), rect.bottom()), (0, 0, 9, 9));
    assert_eq!(image.get_pixel(9, 9), &Rgb(BLUE));
  }

  #[test]
  fn degenerate_box_draws_nothing() {
    let draw = Draw::default();
    let mut image = RgbImage::new(10, 10);
    assert!(draw.draw_box(&mut image, &[5.0, 5.0, 5.0, 5.0], GREEN).is_none());
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn label_without_font_is_skipped() {
    let draw = Draw::default();
    assert!(!draw.has_font());
    let mut image = RgbImage::new(10, 10);
    draw.draw_label(&mut image, Rect::at(0, 0).of_size(5, 5), "Person 0.90", GREEN);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn palette_wraps() {
    assert_eq!(palette(0), palette(PALETTE.len() as u32));
  }
}
