// 该文件是 Kanmen （看门） 项目的一部分。
// src/main.rs - 检测服务主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
  cors::{Any, CorsLayer},
  services::{ServeDir, ServeFile},
  trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kanmen::{
  api::{self, AppState},
  camera::{StreamManager, SystemOpener},
  model::{Serialized, YoloDetector},
  output::Draw,
  pipeline::RetryPolicy,
};

fn app_state(
  manager: Arc<StreamManager>,
  human: YoloDetector,
  badge: YoloDetector,
  draw: Arc<Draw>,
  serialize: bool,
) -> AppState {
  if serialize {
    info!("模型推理已串行化");
    AppState::new(
      manager,
      Arc::new(Serialized::new(human)),
      Arc::new(Serialized::new(badge)),
      draw,
    )
  } else {
    AppState::new(manager, Arc::new(human), Arc::new(badge), draw)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = args::Args::parse();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
    .with(tracing_subscriber::fmt::layer())
    .init();

  info!("Kanmen 检测服务");
  info!("人员模型: {}", args.human_model);
  info!("工牌模型: {}", args.badge_model);

  info!("正在加载模型...");
  let human = YoloDetector::from_url(&args.human_model).context("加载人员模型失败")?;
  let badge = YoloDetector::from_url(&args.badge_model).context("加载工牌模型失败")?;
  info!("模型加载完成");

  let draw = match &args.font {
    Some(path) => {
      Draw::with_font_file(path).with_context(|| format!("加载字体失败: {}", path.display()))?
    }
    None => {
      warn!("未指定字体, 标注只画框不写标签");
      Draw::default()
    }
  };

  let manager = Arc::new(StreamManager::new(SystemOpener));
  let retry = RetryPolicy {
    attempts: args.snapshot_attempts.max(1),
    delay: Duration::from_millis(args.snapshot_delay_ms),
  };
  let state = app_state(
    manager.clone(),
    human,
    badge,
    Arc::new(draw),
    args.serialize_inference,
  )
  .with_jpeg_quality(args.jpeg_quality)
  .with_retry(retry);

  let mut app = api::router(state);
  if let Some(static_dir) = &args.static_dir {
    info!("静态页面目录: {}", static_dir.display());
    let serve_dir =
      ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));
    app = app.fallback_service(serve_dir);
  }
  let app = app
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .layer(TraceLayer::new_for_http());

  let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
  ctrlc::set_handler(move || {
    info!("收到中断或终止信号，准备退出...");
    let _ = shutdown_tx.send(true);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("设置信号处理失败")?;

  let listener = TcpListener::bind(args.bind)
    .await
    .with_context(|| format!("无法监听 {}", args.bind))?;
  info!("服务启动, 监听 {}", args.bind);

  let stream_manager = manager.clone();
  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      let _ = shutdown_rx.changed().await;
      // 结束正在进行的推流，否则长连接会阻止退出
      stream_manager.force_release();
    })
    .await?;

  manager.force_release();
  info!("服务已退出");
  Ok(())
}
