mod common;

use common::{model_dir, rgb_frame, service, wait_for, AlphaPattern, FakeFactory};
use livematte::config::{MattingConfig, StreamingMode};
use livematte::frame::encode_rgb;
use livematte::inference::{SessionPurpose, RECURRENT_CHANNELS};
use livematte::models::ModelId;
use livematte::{Frame, FrameEncoding, PipelineKind, StillRequest};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn with_background() -> MattingConfig {
    // Unreadable background resolves to a solid fill, so output differs
    // from input wherever the matte is transparent
    MattingConfig {
        background: Some(PathBuf::from("/nonexistent/background.png")),
        ..MattingConfig::default()
    }
}

#[test]
fn test_burst_keeps_one_task_in_flight_and_replays_cache() {
    let models = model_dir(&[ModelId::RvmMobileNetV3, ModelId::Modnet]);
    let (service, _, recorder) = service(
        models.path(),
        with_background(),
        FakeFactory::new(Duration::from_millis(40)),
    );
    let frame = rgb_frame(128, 96);

    assert_eq!(service.submit_frame(&frame), frame.data);
    for _ in 0..50 {
        service.submit_frame(&frame);
        assert!(service.scheduler().in_flight(PipelineKind::Recurrent) <= 1);
        assert!(service.scheduler().in_flight(PipelineKind::Fallback) <= 1);
    }
    assert!(recorder.max_concurrent.load(Ordering::SeqCst) <= 1);

    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    assert!(wait_for(WAIT, || {
        service.scheduler().in_flight(PipelineKind::Recurrent) == 0
    }));

    let first = service.submit_frame(&frame);
    let second = service.submit_frame(&frame);
    assert_eq!(first, second);
    assert_ne!(first, frame.data);
    assert_eq!(first.len(), frame.data.len());

    let info = service.try_get_latest_frame_info();
    assert_eq!((info.width, info.height), (128, 96));
    assert_eq!(
        service.scheduler().active_pipeline(),
        Some(PipelineKind::Recurrent)
    );
}

#[test]
fn test_interval_limits_inference_rate() {
    let models = model_dir(&[ModelId::RvmMobileNetV3]);
    let mut config = with_background();
    config.scheduler.recurrent_interval_ms = 60_000;
    let (service, _, recorder) = service(models.path(), config, FakeFactory::new(Duration::ZERO));
    let frame = rgb_frame(64, 64);

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    for _ in 0..20 {
        service.submit_frame(&frame);
    }
    assert_eq!(recorder.runs(), 1);
}

#[test]
fn test_no_models_passes_frames_through() {
    let models = model_dir(&[]);
    let (service, _, recorder) = service(models.path(), with_background(), FakeFactory::new(Duration::ZERO));
    let frame = rgb_frame(64, 48);

    for _ in 0..5 {
        assert_eq!(service.submit_frame(&frame), frame.data);
    }
    assert_eq!(recorder.runs(), 0);
    assert!(!service.try_get_latest_frame_info().available);
}

#[test]
fn test_disabled_passes_frames_through() {
    let models = model_dir(&[ModelId::RvmMobileNetV3]);
    let config = MattingConfig {
        enabled: false,
        ..with_background()
    };
    let (service, shared, recorder) = service(models.path(), config, FakeFactory::new(Duration::ZERO));
    let frame = rgb_frame(64, 48);

    assert_eq!(service.submit_frame(&frame), frame.data);
    assert_eq!(recorder.runs(), 0);

    shared.update(|c| c.enabled = true);
    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || recorder.runs() == 1));
}

#[test]
fn test_responsive_mode_switches_pipeline_and_releases_session() {
    let models = model_dir(&[ModelId::RvmMobileNetV3, ModelId::Modnet]);
    let (service, shared, _) = service(models.path(), with_background(), FakeFactory::new(Duration::ZERO));
    let frame = rgb_frame(96, 64);
    let pool = service.engine().pool();

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    assert!(pool.is_ready(SessionPurpose::Recurrent));

    shared.update(|c| c.streaming_mode = StreamingMode::Responsive);
    service.submit_frame(&frame);
    assert_eq!(
        service.scheduler().active_pipeline(),
        Some(PipelineKind::Fallback)
    );
    assert!(!pool.is_ready(SessionPurpose::Recurrent));
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
}

#[test]
fn test_recurrent_state_keeps_channel_layout() {
    let models = model_dir(&[ModelId::RvmMobileNetV3]);
    let (service, _, recorder) = service(models.path(), with_background(), FakeFactory::new(Duration::ZERO));
    let frame = rgb_frame(128, 128);

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    std::thread::sleep(Duration::from_millis(50));
    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || recorder.runs() >= 2
        && service.scheduler().in_flight(PipelineKind::Recurrent) == 0));

    let state = service.scheduler().recurrent_state();
    for (tensor, channels) in state.tensors().iter().zip(RECURRENT_CHANNELS) {
        assert_eq!(tensor.shape(), &[1, channels, 2, 2]);
    }

    let seen = recorder.state_shapes.lock();
    for (shape, channels) in seen[..4].iter().zip(RECURRENT_CHANNELS) {
        assert_eq!(shape, &vec![1, channels, 1, 1]);
    }
    for (shape, channels) in seen[4..8].iter().zip(RECURRENT_CHANNELS) {
        assert_eq!(shape, &vec![1, channels, 2, 2]);
    }
}

#[test]
fn test_degenerate_recurrent_matte_uses_still_model() {
    let models = model_dir(&[ModelId::RvmMobileNetV3, ModelId::Modnet]);
    let factory = FakeFactory::new(Duration::ZERO).with_pattern(AlphaPattern::Degenerate);
    let (service, _, recorder) = service(models.path(), with_background(), factory);
    let frame = rgb_frame(128, 96);

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    assert!(recorder.last_input_shape(ModelId::RvmMobileNetV3).is_some());
    assert!(recorder.last_input_shape(ModelId::Modnet).is_some());
    assert!(service.engine().pool().is_ready(SessionPurpose::Still));
}

#[test]
fn test_degenerate_recurrent_matte_rerenders_without_live_fallback_weights() {
    let models = model_dir(&[ModelId::RvmMobileNetV3, ModelId::BiRefNetPortrait]);
    let factory = FakeFactory::new(Duration::ZERO).with_pattern(AlphaPattern::Degenerate);
    let (service, _, recorder) = service(models.path(), with_background(), factory);
    let frame = rgb_frame(128, 96);

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    assert_eq!(
        recorder.last_input_shape(ModelId::BiRefNetPortrait),
        Some(vec![1, 3, 1024, 1024])
    );

    // The re-rendered subject is opaque in the centre, so the centre keeps
    // the camera pixel instead of the grey fill
    let output = service.submit_frame(&frame);
    let center = (48 * 128 + 64) * 3;
    assert_eq!(&output[center..center + 3], &frame.data[center..center + 3]);
}

#[test]
fn test_missing_alpha_output_passes_frames_through() {
    let models = model_dir(&[ModelId::RvmMobileNetV3]);
    let factory = FakeFactory::new(Duration::ZERO).with_pattern(AlphaPattern::Missing);
    let (service, _, recorder) = service(models.path(), with_background(), factory);
    let frame = rgb_frame(64, 48);

    for _ in 0..3 {
        assert_eq!(service.submit_frame(&frame), frame.data);
        assert!(wait_for(WAIT, || {
            service.scheduler().in_flight(PipelineKind::Recurrent) == 0
        }));
        std::thread::sleep(Duration::from_millis(40));
    }
    assert!(recorder.runs() >= 2);
    assert!(!service.try_get_latest_frame_info().available);
    assert_eq!(service.submit_frame(&frame), frame.data);
}

#[test]
fn test_panicking_task_does_not_take_down_scheduler() {
    let models = model_dir(&[ModelId::RvmMobileNetV3]);
    let factory = FakeFactory::new(Duration::ZERO).panicking();
    let (service, _, recorder) = service(models.path(), with_background(), factory);
    let frame = rgb_frame(64, 48);

    assert_eq!(service.submit_frame(&frame), frame.data);
    assert!(wait_for(WAIT, || recorder.runs() == 1
        && service.scheduler().in_flight(PipelineKind::Recurrent) == 0));

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(service.submit_frame(&frame), frame.data);
    assert!(wait_for(WAIT, || recorder.runs() == 2
        && service.scheduler().in_flight(PipelineKind::Recurrent) == 0));
    assert!(!service.try_get_latest_frame_info().available);
}

#[test]
fn test_model_availability_is_cached_until_reset() {
    let models = model_dir(&[ModelId::RvmMobileNetV3, ModelId::Modnet]);
    let (service, _, _) = service(models.path(), with_background(), FakeFactory::new(Duration::ZERO));
    let frame = rgb_frame(64, 48);

    service.submit_frame(&frame);
    assert_eq!(
        service.scheduler().active_pipeline(),
        Some(PipelineKind::Recurrent)
    );

    let rvm = models
        .path()
        .join(livematte::models::descriptor(ModelId::RvmMobileNetV3).file_name);
    std::fs::remove_file(rvm).unwrap();
    service.submit_frame(&frame);
    assert_eq!(
        service.scheduler().active_pipeline(),
        Some(PipelineKind::Recurrent)
    );

    assert!(wait_for(WAIT, || {
        service.scheduler().in_flight(PipelineKind::Recurrent) == 0
    }));
    service.scheduler().reset();
    service.submit_frame(&frame);
    assert_eq!(
        service.scheduler().active_pipeline(),
        Some(PipelineKind::Fallback)
    );
}

#[test]
fn test_streaming_and_still_share_one_background() {
    let models = model_dir(&[ModelId::Modnet]);
    let dir = tempfile::tempdir().unwrap();
    let background = dir.path().join("office.png");
    image::RgbImage::from_pixel(320, 240, image::Rgb([0, 120, 60]))
        .save(&background)
        .unwrap();
    let config = MattingConfig {
        background: Some(background),
        ..MattingConfig::default()
    };
    let (service, _, _) = service(models.path(), config, FakeFactory::new(Duration::ZERO));

    let frame = rgb_frame(64, 48);
    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));

    let png = encode_rgb(&common::gradient(64, 48), FrameEncoding::Png, 90).unwrap();
    let result = service.capture_still(&StillRequest::from_bytes(png));
    assert!(result.success);
    assert!(!result.fallback_used);
    assert_eq!(service.backgrounds().loads(), 1);
}

#[test]
fn test_output_keeps_encoding_family() {
    let models = model_dir(&[ModelId::Modnet]);
    let (service, _, _) = service(models.path(), with_background(), FakeFactory::new(Duration::ZERO));
    let image = common::gradient(96, 64);
    let jpeg = encode_rgb(&image, FrameEncoding::Jpeg, 90).unwrap();
    let frame = Frame::new(jpeg, 96, 64, FrameEncoding::Jpeg);

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    let output = service.submit_frame(&frame);
    assert_eq!(&output[..2], &[0xFF, 0xD8]);
    assert_eq!(
        service.scheduler().active_pipeline(),
        Some(PipelineKind::Fallback)
    );
}

#[test]
fn test_rgba_without_background_is_transparent() {
    let models = model_dir(&[ModelId::Modnet]);
    let (service, _, _) = service(models.path(), MattingConfig::default(), FakeFactory::new(Duration::ZERO));
    let rgba = image::DynamicImage::ImageRgb8(common::gradient(64, 64)).to_rgba8();
    let frame = Frame::new(rgba.into_raw(), 64, 64, FrameEncoding::Rgba8);

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));
    let output = service.submit_frame(&frame);
    assert_eq!(output.len(), 64 * 64 * 4);
    // Corner is background, centre is subject
    assert_eq!(output[3], 0);
    let center = (32 * 64 + 32) * 4;
    assert_eq!(output[center + 3], 255);
}

#[test]
fn test_shutdown_passes_through_and_forgets_output() {
    let models = model_dir(&[ModelId::RvmMobileNetV3]);
    let (service, _, _) = service(models.path(), with_background(), FakeFactory::new(Duration::ZERO));
    let frame = rgb_frame(64, 64);

    service.submit_frame(&frame);
    assert!(wait_for(WAIT, || service.try_get_latest_frame_info().available));

    service.shutdown();
    assert!(service.scheduler().is_shut_down());
    assert!(!service.try_get_latest_frame_info().available);
    assert_eq!(service.submit_frame(&frame), frame.data);
    assert!(!service
        .engine()
        .pool()
        .is_ready(SessionPurpose::Recurrent));
}
