// 该文件是 Kanmen （看门） 项目的一部分。
// src/args.rs - 服务参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use url::Url;

/// Kanmen 检测服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "KANMEN_BIND", default_value = "0.0.0.0:8000", value_name = "ADDR")]
  pub bind: SocketAddr,

  /// 人员检测模型，例如 yolo:///models/yolov8n.onnx?size=640
  #[arg(long, env = "KANMEN_HUMAN_MODEL", value_name = "MODEL")]
  pub human_model: Url,

  /// 工牌检测模型，例如 yolo:///models/badge.onnx?names=badge
  #[arg(long, env = "KANMEN_BADGE_MODEL", value_name = "MODEL")]
  pub badge_model: Url,

  /// 标签字体文件（TTF/OTF），不指定时只画框
  #[arg(long, env = "KANMEN_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 输出 JPEG 质量 (1 - 100)
  #[arg(
    long,
    env = "KANMEN_JPEG_QUALITY",
    default_value_t = 85,
    value_parser = clap::value_parser!(u8).range(1..=100),
    value_name = "QUALITY"
  )]
  pub jpeg_quality: u8,

  /// 静态页面目录，挂载在根路径
  #[arg(long, env = "KANMEN_STATIC_DIR", value_name = "DIR")]
  pub static_dir: Option<PathBuf>,

  /// 默认日志级别，RUST_LOG 优先
  #[arg(long, env = "KANMEN_LOG_LEVEL", default_value = "info", value_name = "LEVEL")]
  pub log_level: String,

  /// 串行化模型推理（后端不支持并发调用时使用）
  #[arg(long, env = "KANMEN_SERIALIZE_INFERENCE")]
  pub serialize_inference: bool,

  /// 快照读取帧的最大尝试次数
  #[arg(long, env = "KANMEN_SNAPSHOT_ATTEMPTS", default_value_t = 5, value_name = "COUNT")]
  pub snapshot_attempts: u32,

  /// 快照两次尝试之间的等待时间（毫秒）
  #[arg(long, env = "KANMEN_SNAPSHOT_DELAY_MS", default_value_t = 100, value_name = "MILLIS")]
  pub snapshot_delay_ms: u64,
}
