// 该文件是 Kanmen （看门） 项目的一部分。
// src/api/error.rs - HTTP 错误响应
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

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;

use crate::pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum ApiError {
  #[error("Bad request: {0}")]
  BadRequest(String),
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
  #[error("Internal error: {0}")]
  Internal(String),
}

impl From<JoinError> for ApiError {
  fn from(err: JoinError) -> Self {
    ApiError::Internal(format!("blocking task failed: {}", err))
  }
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Pipeline(
        PipelineError::InvalidInput(_)
        | PipelineError::DeviceUnavailable(_)
        | PipelineError::NoFrameAvailable
        | PipelineError::EncodingFailure(_),
      ) => StatusCode::BAD_REQUEST,
      ApiError::Pipeline(PipelineError::Detection(_) | PipelineError::Internal(_))
      | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = self.to_string();

    if status.is_server_error() {
      tracing::error!(status = %status, message = %message, "Request error");
    } else {
      tracing::warn!(status = %status, message = %message, "Request rejected");
    }

    let body = Json(json!({
      "success": false,
      "error": message,
    }));
    (status, body).into_response()
  }
}

#[cfg(test)]
mod tests {
  use axum::body::to_bytes;
  use serde_json::Value;

  use super::*;

  async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[test]
  fn caller_problems_are_bad_requests() {
    let cases = [
      ApiError::BadRequest("confidence".to_string()),
      PipelineError::InvalidInput("empty".to_string()).into(),
      PipelineError::DeviceUnavailable("Cannot open camera source: 9".to_string()).into(),
      PipelineError::NoFrameAvailable.into(),
      PipelineError::EncodingFailure("jpeg".to_string()).into(),
    ];
    for error in cases {
      assert_eq!(error.status(), StatusCode::BAD_REQUEST, "{}", error);
    }
  }

  #[test]
  fn backend_problems_are_server_errors() {
    let cases = [
      ApiError::Internal("join".to_string()),
      PipelineError::Detection("tract".to_string()).into(),
      PipelineError::Internal("oops".to_string()).into(),
    ];
    for error in cases {
      assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR, "{}", error);
    }
  }

  #[tokio::test]
  async fn error_body_shape() {
    let response = ApiError::from(PipelineError::NoFrameAvailable).into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], Value::Bool(false));
    assert_eq!(body["error"], "Cannot read frame from camera");
  }
}
