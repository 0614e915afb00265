// 该文件是 Kanmen （看门） 项目的一部分。
// src/bin/detect.rs - 单张图片检测工具
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use kanmen::{
  FromUrl,
  model::YoloDetector,
  output::{Draw, Render, SaveImageFileOutput},
  pipeline::{self, DetectOptions, SingleModel},
};

/// 对一张图片运行检测，输出标注图像和检测记录
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，例如 yolo:///models/yolov8n.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图片
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 输出路径，例如 image:///tmp/result.jpg，记录写入同名 .json
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub confidence: f32,
  /// 只保留这些类别，逗号分隔
  #[arg(long, value_delimiter = ',', value_name = "IDS")]
  pub classes: Vec<u32>,
  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  anyhow::ensure!(
    (0.0..=1.0).contains(&args.confidence),
    "置信度阈值必须在 [0, 1] 之间: {}",
    args.confidence
  );

  info!("模型文件路径: {}", args.model);
  info!("输入图片: {}", args.input.display());

  let detector = Arc::new(YoloDetector::from_url(&args.model)?);
  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };
  let mut inference = SingleModel::new(detector, Arc::new(draw));
  if !args.classes.is_empty() {
    inference = inference.with_classes(&args.classes);
  }

  let data = std::fs::read(&args.input)
    .with_context(|| format!("无法读取图片: {}", args.input.display()))?;
  let options = DetectOptions {
    confidence: args.confidence,
    ..DetectOptions::default()
  };

  let now = std::time::Instant::now();
  let annotated = pipeline::detect_image(&inference, &data, &options)?;
  info!(
    "检测完成，共 {} 个目标，耗时: {:.2?}",
    annotated.record.count(),
    now.elapsed()
  );

  if let Some(url) = &args.output {
    let output = SaveImageFileOutput::from_url(url)?;
    output.render_result(&annotated)?;
  }

  println!("{}", serde_json::to_string_pretty(&annotated.record)?);
  Ok(())
}
