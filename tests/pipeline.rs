// 该文件是 Kanmen （看门） 项目的一部分。
// tests/pipeline.rs - 检测流水线集成测试
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

mod common;

use std::{io::Cursor, sync::Arc, sync::atomic::Ordering, time::Duration};

use chrono::Utc;
use image::{ImageFormat, Rgb, RgbImage};

use common::{FakeDetector, manager, other, person, test_image};
use kanmen::{
  api,
  camera::CameraSource,
  output::Draw,
  pipeline::{
    self, DetectOptions, DualModel, LiveStream, PipelineError, PipelineState, RetryPolicy,
    SingleModel,
  },
  record::DetectionCount,
};

fn fast_retry() -> RetryPolicy {
  RetryPolicy {
    attempts: 5,
    delay: Duration::from_millis(1),
  }
}

fn png(image: &RgbImage) -> Vec<u8> {
  let mut data = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
    .unwrap();
  data
}

fn human_model(detector: FakeDetector) -> (Arc<FakeDetector>, Arc<SingleModel<FakeDetector>>) {
  let detector = Arc::new(detector);
  let model = SingleModel::human(detector.clone(), Arc::new(Draw::default()));
  (detector, Arc::new(model))
}

#[test]
fn snapshot_succeeds_on_third_attempt() {
  let (manager, stats) = manager();
  stats.warmup_failures.store(2, Ordering::SeqCst);
  let (_, model) = human_model(FakeDetector::new(vec![person(0.9)]));

  let annotated = pipeline::snapshot(
    &manager,
    &CameraSource::Index(0),
    model.as_ref(),
    &DetectOptions::default(),
    &fast_retry(),
  )
  .unwrap();

  assert_eq!(stats.reads(), 3);
  assert_eq!(annotated.record.count(), 1);
  assert!(annotated.jpeg.starts_with(&[0xFF, 0xD8]));
  assert_eq!(stats.held(), 0);
  assert_eq!(manager.active_stream(), None);
}

#[test]
fn snapshot_exhaustion_releases_device() {
  let (manager, stats) = manager();
  stats.broken.store(true, Ordering::SeqCst);
  let (detector, model) = human_model(FakeDetector::new(vec![person(0.9)]));

  let result = pipeline::snapshot(
    &manager,
    &CameraSource::Index(0),
    model.as_ref(),
    &DetectOptions::default(),
    &fast_retry(),
  );

  assert!(matches!(result, Err(PipelineError::NoFrameAvailable)));
  assert_eq!(stats.reads(), 5);
  assert_eq!(detector.calls(), 0);
  assert_eq!(stats.opened(), 1);
  assert_eq!(stats.held(), 0);
  assert_eq!(manager.active_stream(), None);
}

#[test]
fn snapshot_reports_unopenable_device() {
  let (manager, stats) = manager();
  stats.fail_open.store(true, Ordering::SeqCst);
  let (_, model) = human_model(FakeDetector::new(vec![]));

  let result = pipeline::snapshot(
    &manager,
    &CameraSource::Index(9),
    model.as_ref(),
    &DetectOptions::default(),
    &fast_retry(),
  );

  match result {
    Err(PipelineError::DeviceUnavailable(message)) => assert!(message.contains('9')),
    unexpected => panic!("unexpected result: {:?}", unexpected.map(|a| a.record)),
  }
  assert_eq!(manager.active_stream(), None);
}

#[test]
fn uniform_upload_rejected_before_detection() {
  let (detector, model) = human_model(FakeDetector::new(vec![person(0.9)]));
  let blank = png(&RgbImage::from_pixel(16, 16, Rgb([7, 7, 7])));

  let result = pipeline::detect_image(model.as_ref(), &blank, &DetectOptions::default());

  assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
  assert_eq!(detector.calls(), 0);
}

#[test]
fn garbage_upload_is_invalid_input() {
  let (detector, model) = human_model(FakeDetector::new(vec![]));
  let result = pipeline::detect_image(model.as_ref(), b"not an image", &DetectOptions::default());
  assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
  assert_eq!(detector.calls(), 0);
}

#[test]
fn human_upload_keeps_only_people_above_upload_threshold() {
  let (detector, model) = human_model(FakeDetector::new(vec![
    person(0.9),
    other(3, 0.8),
    person(0.3),
    person(0.2),
  ]));
  let options = DetectOptions {
    confidence: api::UPLOAD_CONFIDENCE,
    ..DetectOptions::default()
  };

  let annotated = pipeline::detect_image(model.as_ref(), &png(&test_image()), &options).unwrap();

  assert_eq!(detector.calls(), 1);
  assert_eq!(annotated.record.count(), 2);
  assert_eq!(annotated.record.classes, vec![0.0, 0.0]);
  assert_eq!(annotated.record.confidence, vec![0.9, 0.3]);
  let decoded = image::load_from_memory(&annotated.jpeg).unwrap();
  assert_eq!((decoded.width(), decoded.height()), (64, 48));
}

#[test]
fn backend_failure_propagates_from_single_shot_modes() {
  let (manager, stats) = manager();
  let (detector, model) = human_model(FakeDetector::new(vec![person(0.9)]).failing_every(1));

  let upload = pipeline::detect_image(model.as_ref(), &png(&test_image()), &DetectOptions::default());
  assert!(matches!(upload, Err(PipelineError::Detection(_))));

  let snapshot = pipeline::snapshot(
    &manager,
    &CameraSource::Index(0),
    model.as_ref(),
    &DetectOptions::default(),
    &fast_retry(),
  );
  assert!(matches!(snapshot, Err(PipelineError::Detection(_))));
  assert_eq!(detector.calls(), 2);
  assert_eq!(stats.opened(), 1);
  assert_eq!(stats.held(), 0);
  assert_eq!(manager.active_stream(), None);
}

#[test]
fn annotated_frames_carry_capture_time() {
  let (manager, _stats) = manager();
  let (_, model) = human_model(FakeDetector::new(vec![]));
  let before = Utc::now();

  let annotated = pipeline::snapshot(
    &manager,
    &CameraSource::Index(0),
    model.as_ref(),
    &DetectOptions::default(),
    &fast_retry(),
  )
  .unwrap();

  assert!(annotated.captured_at >= before);
  assert!(annotated.captured_at <= Utc::now());
}

#[test]
fn stream_drop_releases_device() {
  let (manager, stats) = manager();
  let (_, model) = human_model(FakeDetector::new(vec![person(0.9)]));

  let mut live = LiveStream::start(
    manager.clone(),
    &CameraSource::Index(0),
    model,
    DetectOptions::default(),
  )
  .unwrap();
  assert_eq!(live.state(), PipelineState::Streaming);

  let frames: Vec<_> = live.by_ref().take(3).collect();
  assert_eq!(frames.len(), 3);
  assert!(frames.iter().all(|frame| frame.record.count() == 1));
  assert_eq!(stats.held(), 1);

  drop(live);
  assert_eq!(stats.held(), 0);
  assert_eq!(manager.active_stream(), None);
}

#[test]
fn stream_ends_silently_when_preempted() {
  let (manager, stats) = manager();
  let (_, model) = human_model(FakeDetector::new(vec![person(0.9)]));
  let source = CameraSource::Index(0);

  let mut live =
    LiveStream::start(manager.clone(), &source, model, DetectOptions::default()).unwrap();
  assert!(live.next().is_some());

  let newer = manager.start_stream(&source).unwrap();
  assert!(live.next().is_none());
  assert_eq!(live.state(), PipelineState::Done);

  drop(live);
  assert_eq!(manager.active_stream(), Some(newer));
  assert_eq!(stats.opened(), 1);
  assert_eq!(stats.held(), 1);
  assert!(manager.get_frame(newer).is_some());

  manager.stop_stream(newer);
  assert_eq!(stats.held(), 0);
}

#[test]
fn stream_skips_frames_the_backend_fails_on() {
  let (manager, _stats) = manager();
  let (detector, model) = human_model(FakeDetector::new(vec![person(0.9)]).failing_every(2));

  let live = LiveStream::start(
    manager,
    &CameraSource::Index(0),
    model,
    DetectOptions::default(),
  )
  .unwrap();
  let frames: Vec<_> = live.take(3).collect();

  assert_eq!(frames.len(), 3);
  assert_eq!(detector.calls(), 5);
}

#[test]
fn stream_fails_when_device_stops_delivering() {
  let (manager, stats) = manager();
  let (_, model) = human_model(FakeDetector::new(vec![]));

  let mut live = LiveStream::start(
    manager.clone(),
    &CameraSource::Index(0),
    model,
    DetectOptions::default(),
  )
  .unwrap();
  stats.broken.store(true, Ordering::SeqCst);

  assert!(live.next().is_none());
  assert_eq!(live.state(), PipelineState::Failed);
  assert_eq!(stats.held(), 0);
  assert_eq!(manager.active_stream(), None);
}

#[test]
fn cancelled_stream_releases_device() {
  let (manager, stats) = manager();
  let (detector, model) = human_model(FakeDetector::new(vec![]));

  let mut live = LiveStream::start(
    manager.clone(),
    &CameraSource::Index(0),
    model,
    DetectOptions::default(),
  )
  .unwrap()
  .with_cancel(|| true);

  assert!(live.next().is_none());
  assert_eq!(live.state(), PipelineState::Done);
  assert_eq!(detector.calls(), 0);
  assert_eq!(stats.held(), 0);
}

#[test]
fn combined_snapshot_counts_both_models() {
  let (manager, _stats) = manager();
  let human = Arc::new(FakeDetector::new(vec![person(0.9), other(2, 0.9)]));
  let badge = Arc::new(FakeDetector::new(vec![other(0, 0.8), other(1, 0.7)]));
  let model = DualModel::new(human, badge, Arc::new(Draw::default()));

  let annotated = pipeline::snapshot(
    &manager,
    &CameraSource::Index(0),
    &model,
    &DetectOptions::default(),
    &fast_retry(),
  )
  .unwrap();

  assert_eq!(annotated.record.humans.count, 1);
  assert_eq!(annotated.record.badges.count, 2);
  assert_eq!(annotated.record.total_count, 3);
  assert_eq!(annotated.record.total(), 3);
}

#[test]
fn force_release_ends_running_stream() {
  let (manager, stats) = manager();
  let (_, model) = human_model(FakeDetector::new(vec![]));

  let mut live = LiveStream::start(
    manager.clone(),
    &CameraSource::Index(0),
    model,
    DetectOptions::default(),
  )
  .unwrap();
  assert!(live.next().is_some());

  manager.force_release();
  assert_eq!(stats.held(), 0);
  assert!(live.next().is_none());
  assert_eq!(live.state(), PipelineState::Done);
}
