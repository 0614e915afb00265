// 该文件是 Kanmen （看门） 项目的一部分。
// src/api.rs - HTTP 接口
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

//! # HTTP 接口
//!
//! 路由只负责解析请求与整理响应，检测本身交给 [`crate::pipeline`]。
//! 所有会阻塞的工作（推理、读帧、重试等待）都在 `spawn_blocking` 中运行。

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, Query, State},
  response::Response,
  routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
  camera::{CameraSource, StreamManager},
  codec,
  model::Detector,
  output::Draw,
  pipeline::{self, DetectOptions, DualModel, Inference, RetryPolicy, SingleModel},
  record::{CombinedRecord, CountedDetections, DetectionCount, DetectionRecord, WithCount},
};

mod error;
pub mod stream;

pub use self::error::ApiError;

/// 上传图片的大小上限
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub const SERVICE_NAME: &str = "kanmen";

/// 上传接口没有置信度参数，使用较低的默认阈值
pub const UPLOAD_CONFIDENCE: f32 = 0.25;

type SingleInference = dyn Inference<Record = DetectionRecord>;
type CombinedInference = dyn Inference<Record = CombinedRecord>;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
  pub manager: Arc<StreamManager>,
  pub human: Arc<SingleInference>,
  pub badge: Arc<SingleInference>,
  pub combined: Arc<CombinedInference>,
  pub jpeg_quality: u8,
  pub retry: RetryPolicy,
}

impl AppState {
  pub fn new<H, B>(manager: Arc<StreamManager>, human: Arc<H>, badge: Arc<B>, draw: Arc<Draw>) -> Self
  where
    H: Detector + 'static,
    B: Detector + 'static,
  {
    AppState {
      manager,
      human: Arc::new(SingleModel::human(human.clone(), draw.clone())),
      badge: Arc::new(SingleModel::new(badge.clone(), draw.clone())),
      combined: Arc::new(DualModel::new(human, badge, draw)),
      jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
    self.jpeg_quality = quality;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn options(&self, confidence: f32) -> DetectOptions {
    DetectOptions {
      confidence,
      jpeg_quality: self.jpeg_quality,
    }
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/detect_human_by_image", post(detect_human_by_image))
    .route("/detect_badge_by_image", post(detect_badge_by_image))
    .route("/camera/stream", get(camera_stream))
    .route("/badge/stream", get(badge_stream))
    .route("/combined/stream", get(combined_stream))
    .route("/camera/snapshot", get(camera_snapshot))
    .route("/badge/snapshot", get(badge_snapshot))
    .route("/health", get(health))
    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
    .with_state(state)
}

/// 摄像头类接口的查询参数
///
/// 两个字段都按字符串接收，自行解析后返回统一格式的 400 错误。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraQuery {
  pub source: Option<String>,
  pub confidence: Option<String>,
}

impl CameraQuery {
  pub const DEFAULT_CONFIDENCE: f32 = 0.5;

  pub fn source(&self) -> Result<CameraSource, ApiError> {
    match self.source.as_deref() {
      None => Ok(CameraSource::default()),
      Some(raw) => raw
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid source '{}': {}", raw, e))),
    }
  }

  pub fn confidence(&self) -> Result<f32, ApiError> {
    let Some(raw) = self.confidence.as_deref() else {
      return Ok(Self::DEFAULT_CONFIDENCE);
    };
    match raw.trim().parse::<f32>() {
      Ok(value) if (0.0..=1.0).contains(&value) => Ok(value),
      _ => Err(ApiError::BadRequest(format!(
        "confidence must be a number in [0, 1], got '{}'",
        raw
      ))),
    }
  }
}

/// 图片与快照接口的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse<R> {
  pub success: bool,
  pub annotated_image: String,
  pub detections: R,
  pub total_detections: usize,
}

impl<R> DetectResponse<R> {
  pub fn new(jpeg: &[u8], detections: R, total_detections: usize) -> Self {
    DetectResponse {
      success: true,
      annotated_image: STANDARD.encode(jpeg),
      detections,
      total_detections,
    }
  }
}

async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
  let field = multipart
    .next_field()
    .await
    .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    .ok_or_else(|| ApiError::BadRequest("no file uploaded".to_string()))?;

  debug!(
    "收到上传文件: 字段 {:?}, 文件名 {:?}",
    field.name(),
    field.file_name()
  );
  let data = field
    .bytes()
    .await
    .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;
  Ok(data.to_vec())
}

async fn detect_upload<I>(
  inference: Arc<I>,
  options: DetectOptions,
  multipart: Multipart,
) -> Result<Json<DetectResponse<I::Record>>, ApiError>
where
  I: Inference + ?Sized + 'static,
{
  let data = read_upload(multipart).await?;
  let annotated =
    tokio::task::spawn_blocking(move || pipeline::detect_image(inference.as_ref(), &data, &options))
      .await??;

  let total = annotated.record.total();
  info!("图片检测完成, 共 {} 个目标", total);
  Ok(Json(DetectResponse::new(
    &annotated.jpeg,
    annotated.record,
    total,
  )))
}

async fn snapshot_response<I>(
  state: AppState,
  inference: Arc<I>,
  query: CameraQuery,
) -> Result<Json<DetectResponse<<I::Record as WithCount>::Counted>>, ApiError>
where
  I: Inference + ?Sized + 'static,
{
  let source = query.source()?;
  let options = state.options(query.confidence()?);
  let manager = state.manager.clone();
  let retry = state.retry;

  let annotated = tokio::task::spawn_blocking(move || {
    pipeline::snapshot(&manager, &source, inference.as_ref(), &options, &retry)
  })
  .await??;

  let total = annotated.record.total();
  info!("快照检测完成, 共 {} 个目标", total);
  Ok(Json(DetectResponse::new(
    &annotated.jpeg,
    annotated.record.with_count(),
    total,
  )))
}

pub async fn detect_human_by_image(
  State(state): State<AppState>,
  multipart: Multipart,
) -> Result<Json<DetectResponse<DetectionRecord>>, ApiError> {
  let options = state.options(UPLOAD_CONFIDENCE);
  detect_upload(state.human, options, multipart).await
}

pub async fn detect_badge_by_image(
  State(state): State<AppState>,
  multipart: Multipart,
) -> Result<Json<DetectResponse<DetectionRecord>>, ApiError> {
  let options = state.options(UPLOAD_CONFIDENCE);
  detect_upload(state.badge, options, multipart).await
}

pub async fn camera_stream(
  State(state): State<AppState>,
  Query(query): Query<CameraQuery>,
) -> Result<Response, ApiError> {
  let options = state.options(query.confidence()?);
  stream::mjpeg(state.manager, query.source()?, state.human, options).await
}

pub async fn badge_stream(
  State(state): State<AppState>,
  Query(query): Query<CameraQuery>,
) -> Result<Response, ApiError> {
  let options = state.options(query.confidence()?);
  stream::mjpeg(state.manager, query.source()?, state.badge, options).await
}

pub async fn combined_stream(
  State(state): State<AppState>,
  Query(query): Query<CameraQuery>,
) -> Result<Response, ApiError> {
  let options = state.options(query.confidence()?);
  stream::mjpeg(state.manager, query.source()?, state.combined, options).await
}

pub async fn camera_snapshot(
  State(state): State<AppState>,
  Query(query): Query<CameraQuery>,
) -> Result<Json<DetectResponse<CountedDetections>>, ApiError> {
  let inference = state.human.clone();
  snapshot_response(state, inference, query).await
}

pub async fn badge_snapshot(
  State(state): State<AppState>,
  Query(query): Query<CameraQuery>,
) -> Result<Json<DetectResponse<CountedDetections>>, ApiError> {
  let inference = state.badge.clone();
  snapshot_response(state, inference, query).await
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
  Json(json!({
    "status": "healthy",
    "service": SERVICE_NAME,
    "camera_active": state.manager.active_stream().is_some(),
  }))
}
