// 该文件是 Kanmen （看门） 项目的一部分。
// src/api/stream.rs - MJPEG 推流
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

use std::{convert::Infallible, sync::Arc};

use axum::{
  body::{Body, Bytes},
  http::header,
  response::Response,
};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::ApiError;
use crate::{
  camera::{CameraSource, StreamManager},
  pipeline::{Annotated, DetectOptions, Inference, LiveStream},
  record::WithCount,
};

pub const BOUNDARY: &str = "frame";

/// 发送队列深度，慢客户端会让推理线程等待而不是堆积帧
const CHANNEL_DEPTH: usize = 2;

pub fn content_type() -> String {
  format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// 组装一个 multipart 分段，`X-Timestamp` 为帧的采集时间
pub fn frame_part(
  jpeg: &[u8],
  detections: &str,
  sequence: u64,
  captured_at: DateTime<Utc>,
) -> Bytes {
  let head = format!(
    "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Sequence: {}\r\nX-Timestamp: {}\r\nX-Detections: {}\r\n\r\n",
    BOUNDARY,
    jpeg.len(),
    sequence,
    captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    detections
  );
  let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
  part.extend_from_slice(head.as_bytes());
  part.extend_from_slice(jpeg);
  part.extend_from_slice(b"\r\n");
  Bytes::from(part)
}

fn encode_part<R: WithCount>(annotated: Annotated<R>, sequence: u64) -> Option<Bytes> {
  let Annotated {
    jpeg,
    record,
    captured_at,
  } = annotated;
  match serde_json::to_string(&record.with_count()) {
    Ok(detections) => Some(frame_part(&jpeg, &detections, sequence, captured_at)),
    Err(e) => {
      warn!("检测记录序列化失败, 跳过第 {} 帧: {}", sequence, e);
      None
    }
  }
}

/// 打开摄像头并返回 MJPEG 响应
///
/// 打开失败在响应开始前以错误返回。之后推理在阻塞线程中逐帧进行，
/// 客户端断开或会话被抢占时结束，会话随 [`LiveStream`] 一起释放。
pub async fn mjpeg<I>(
  manager: Arc<StreamManager>,
  source: CameraSource,
  inference: Arc<I>,
  options: DetectOptions,
) -> Result<Response, ApiError>
where
  I: Inference + ?Sized + 'static,
{
  let live =
    tokio::task::spawn_blocking(move || LiveStream::start(manager, &source, inference, options))
      .await??;

  let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(CHANNEL_DEPTH);
  let watcher = tx.clone();
  let live = live.with_cancel(move || watcher.is_closed());

  tokio::task::spawn_blocking(move || {
    for (sequence, annotated) in (0u64..).zip(live) {
      let Some(part) = encode_part(annotated, sequence) else {
        continue;
      };
      if tx.blocking_send(Ok(part)).is_err() {
        debug!("客户端已断开, 停止推流");
        break;
      }
    }
  });

  Response::builder()
    .header(header::CONTENT_TYPE, content_type())
    .header(header::CACHE_CONTROL, "no-cache")
    .body(Body::from_stream(ReceiverStream::new(rx)))
    .map_err(|e| ApiError::Internal(e.to_string()))
}
