mod common;

use std::sync::atomic::Ordering;

use futures::future::join_all;

use common::{png_source, rig};
use pngify::{
	Backend, ConversionStatus, ConvertError, Workspace,
	compose::MaskPolarity,
	events::EventKind
};

fn alphas(png: &[u8]) -> Vec<u8> {
	image::load_from_memory(png).unwrap().to_rgba8().pixels().map(|p| p[3]).collect()
}

#[tokio::test]
async fn concurrent_submissions_run_one_at_a_time() {
	let r = rig(0.0, vec![Backend::Portable], &[], MaskPolarity::Inverted);
	let sources: Vec<_> = (0..4).map(|i| png_source(&format!("f{i}.png"), 4 + i, 3)).collect();

	let outputs = join_all(sources.iter().map(|s| r.converter.convert(s, true))).await;

	assert!(outputs.iter().all(Result::is_ok));
	assert_eq!(r.engine.calls.load(Ordering::SeqCst), 4);
	assert_eq!(r.engine.max_in_flight.load(Ordering::SeqCst), 1);
	assert_eq!(r.factory.creates(), vec![Backend::Portable]);
}

#[tokio::test]
async fn accelerated_failure_falls_back_once() {
	let r = rig(0.0, vec![Backend::Accelerated, Backend::Portable], &[Backend::Accelerated], MaskPolarity::Inverted);
	let mut ws = Workspace::new(r.converter.handles().clone());
	for i in 0..3 {
		ws.enqueue(png_source(&format!("p{i}.png"), 5, 5));
	}

	let report = r.converter.process(&mut ws, true).await;

	assert_eq!(report.completed, 3);
	assert_eq!(r.factory.creates(), vec![Backend::Accelerated, Backend::Portable]);
	let handle = r.converter.segmenter().ensure_ready().await.unwrap();
	assert_eq!(handle.backend, Backend::Portable);
	assert_eq!(r.factory.creates().len(), 2);
}

#[tokio::test]
async fn no_backend_fails_each_file_but_plain_conversion_works() {
	let both = [Backend::Accelerated, Backend::Portable];
	let r = rig(0.0, both.to_vec(), &both, MaskPolarity::Inverted);
	let mut ws = Workspace::new(r.converter.handles().clone());
	let a = ws.enqueue(png_source("a.png", 3, 3));
	let b = ws.enqueue(png_source("b.png", 3, 3));

	let report = r.converter.process(&mut ws, true).await;

	assert_eq!(report.completed, 0);
	assert_eq!(report.failures.len(), 2);
	for failure in &report.failures {
		match &failure.cause {
			ConvertError::SegmentationUnavailable { attempts } => {
				let backends: Vec<Backend> = attempts.iter().map(|f| f.backend).collect();
				assert_eq!(backends, both.to_vec());
				assert!(attempts[0].reason.contains("device lost"));
			}
			other => panic!("unexpected error: {other}")
		}
	}
	assert!(matches!(ws.get(a).unwrap().status(), ConversionStatus::Failed(_)));
	assert!(matches!(ws.get(b).unwrap().status(), ConversionStatus::Failed(_)));
	// each file retried the whole strategy
	assert_eq!(r.factory.creates().len(), 4);
	assert_eq!(r.engine.calls.load(Ordering::SeqCst), 0);

	let png = r.converter.convert(&png_source("a.png", 3, 3), false).await.unwrap();
	assert!(alphas(&png).iter().all(|&a| a == 255));
}

#[tokio::test]
async fn polarity_decides_which_side_stays() {
	let inverted = rig(0.25, vec![Backend::Portable], &[], MaskPolarity::Inverted);
	let direct = rig(0.25, vec![Backend::Portable], &[], MaskPolarity::Direct);
	let src = png_source("cat.png", 4, 4);

	let kept = inverted.converter.convert(&src, true).await.unwrap();
	let cut = direct.converter.convert(&src, true).await.unwrap();

	assert!(alphas(&kept).iter().all(|&a| a == 191));
	assert!(alphas(&cut).iter().all(|&a| a == 64));
}

#[tokio::test]
async fn repeated_conversion_gives_identical_png() {
	let r = rig(0.6, vec![Backend::Portable], &[], MaskPolarity::Inverted);
	let src = png_source("same.png", 7, 2);
	let first = r.converter.convert(&src, true).await.unwrap();
	let second = r.converter.convert(&src, true).await.unwrap();
	assert_eq!(first, second);
}

#[tokio::test]
async fn batch_events_follow_the_run() {
	let r = rig(0.0, vec![Backend::Portable], &[], MaskPolarity::Inverted);
	let mut ws = Workspace::new(r.converter.handles().clone());
	ws.enqueue(png_source("a.png", 2, 2));
	ws.enqueue(pngify::SourceImage::new("broken.jpg", pngify::source::MediaType::Jpeg, vec![0xff, 0xd8, 0x00]));

	let report = r.converter.process(&mut ws, true).await;
	assert_eq!(report.completed, 1);

	assert_eq!(
		r.events.kinds(),
		vec![EventKind::ConvertStarted, EventKind::ConvertError, EventKind::ConvertSuccess]
	);
	let done = r.events.last(EventKind::ConvertSuccess).unwrap();
	assert_eq!(done.metadata["count"], 1);
	assert_eq!(done.metadata["failed"], 1);
	let err = r.events.last(EventKind::ConvertError).unwrap();
	assert_eq!(err.metadata["name"], "broken.jpg");
}

#[tokio::test]
async fn discarding_results_releases_previews() {
	let r = rig(0.0, vec![Backend::Portable], &[], MaskPolarity::Inverted);
	let handles = r.converter.handles().clone();
	let mut ws = Workspace::new(handles.clone());
	let id = ws.enqueue(png_source("a.png", 2, 2));
	ws.enqueue(png_source("b.png", 2, 2));
	r.converter.process(&mut ws, false).await;

	assert_eq!(handles.live_count(), 2);
	assert!(ws.discard(id));
	assert_eq!(handles.live_count(), 1);
	drop(ws);
	assert_eq!(handles.live_count(), 0);
}
