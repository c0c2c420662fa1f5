mod common;

use std::{io::Read, sync::Arc, time::Duration};

use common::{BrokenArchive, MemorySink, png_source, rig};
use pngify::{
	Backend, BatchArchiver, Delivery, Workspace,
	compose::MaskPolarity,
	events::EventKind,
	source::{MediaType, SourceImage}
};

/// Converts `names` (plus one undecodable file) without background removal.
async fn converted(names: &[&str]) -> (Workspace, Arc<common::EventLog>) {
	let r = rig(0.0, vec![Backend::Portable], &[], MaskPolarity::Inverted);
	let mut ws = Workspace::new(r.converter.handles().clone());
	for (i, name) in names.iter().enumerate() {
		ws.enqueue(png_source(name, 2 + i as u32, 2));
	}
	ws.enqueue(SourceImage::new("junk.png", MediaType::Png, b"junk".to_vec()));
	r.converter.process(&mut ws, false).await;
	(ws, r.events)
}

#[tokio::test]
async fn nothing_completed_means_no_download() {
	let (ws, _) = converted(&[]).await;
	let sink = Arc::new(MemorySink::default());
	let events = Arc::new(common::EventLog::default());
	let archiver = BatchArchiver::new(sink.clone(), events.clone());

	let delivery = archiver.download_all(ws.results()).await.unwrap();

	assert_eq!(delivery, Delivery::Nothing);
	assert!(sink.downloads().is_empty());
	assert!(events.kinds().is_empty());
}

#[tokio::test]
async fn single_result_is_delivered_directly() {
	let (ws, _) = converted(&["photo.jpg"]).await;
	let sink = Arc::new(MemorySink::default());
	let events = Arc::new(common::EventLog::default());
	let archiver = BatchArchiver::new(sink.clone(), events.clone());

	let delivery = archiver.download_all(ws.results()).await.unwrap();

	assert_eq!(delivery, Delivery::Single {
		name: "photo-pngify.png".into()
	});
	let downloads = sink.downloads();
	assert_eq!(downloads.len(), 1);
	assert_eq!(Some(downloads[0].bytes.as_slice()), ws.completed().next().and_then(|r| r.output()));
	assert_eq!(events.kinds(), vec![EventKind::DownloadSingle]);
}

#[tokio::test]
async fn several_results_become_one_zip() {
	let (ws, _) = converted(&["a.jpg", "b.webp", "c.png"]).await;
	let sink = Arc::new(MemorySink::default());
	let events = Arc::new(common::EventLog::default());
	let archiver = BatchArchiver::new(sink.clone(), events.clone());

	let delivery = archiver.download_all(ws.results()).await.unwrap();

	let downloads = sink.downloads();
	assert_eq!(downloads.len(), 1);
	let zip_name = &downloads[0].name;
	assert!(zip_name.starts_with("pngify-converted-") && zip_name.ends_with(".zip"));
	assert!(!zip_name.contains(':'));
	assert_eq!(delivery, Delivery::Archive {
		name: zip_name.clone(),
		entries: 3
	});

	let mut zip = zip::ZipArchive::new(std::io::Cursor::new(downloads[0].bytes.clone())).unwrap();
	let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
	names.sort();
	assert_eq!(names, vec!["a-pngify.png", "b-pngify.png", "c-pngify.png"]);

	let mut png = Vec::new();
	zip.by_name("b-pngify.png").unwrap().read_to_end(&mut png).unwrap();
	let img = image::load_from_memory(&png).unwrap();
	assert_eq!((img.width(), img.height()), (3, 2));

	let ev = events.last(EventKind::DownloadZip).unwrap();
	assert_eq!(ev.metadata["count"], 3);
}

#[tokio::test(start_paused = true)]
async fn failed_archive_falls_back_to_staggered_downloads() {
	let (ws, _) = converted(&["a.jpg", "b.jpg", "c.jpg"]).await;
	let sink = Arc::new(MemorySink::default());
	let events = Arc::new(common::EventLog::default());
	let archiver = BatchArchiver::new(sink.clone(), events.clone()).with_builder(Arc::new(BrokenArchive));

	let start = tokio::time::Instant::now();
	let delivery = archiver.download_all(ws.results()).await.unwrap();

	let names = vec!["a-pngify.png".to_string(), "b-pngify.png".to_string(), "c-pngify.png".to_string()];
	assert_eq!(delivery, Delivery::Individual { names: names.clone() });

	let downloads = sink.downloads();
	let got: Vec<String> = downloads.iter().map(|d| d.name.clone()).collect();
	assert_eq!(got, names);
	let offsets: Vec<Duration> = downloads.iter().map(|d| d.at - start).collect();
	assert_eq!(offsets, vec![
		Duration::ZERO,
		Duration::from_millis(500),
		Duration::from_millis(1000)
	]);
	assert_eq!(events.kinds(), vec![EventKind::DownloadZip]);
}

#[tokio::test(start_paused = true)]
async fn refused_file_does_not_stop_the_rest() {
	let (ws, _) = converted(&["a.jpg", "b.jpg", "c.jpg"]).await;
	let sink = Arc::new(MemorySink::refusing(&["b-pngify.png"]));
	let events = Arc::new(common::EventLog::default());
	let archiver = BatchArchiver::new(sink.clone(), events)
		.with_builder(Arc::new(BrokenArchive))
		.with_stagger(Duration::from_millis(100));

	let err = archiver.download_all(ws.results()).await.unwrap_err();

	assert_eq!(err.name, "b-pngify.png");
	let got: Vec<String> = sink.downloads().iter().map(|d| d.name.clone()).collect();
	assert_eq!(got, vec!["a-pngify.png", "c-pngify.png"]);
}

#[tokio::test]
async fn duplicate_names_are_kept_apart() {
	let (ws, _) = converted(&["shot.jpg", "shot.png"]).await;
	let sink = Arc::new(MemorySink::default());
	let archiver = BatchArchiver::new(sink.clone(), Arc::new(common::EventLog::default()));

	archiver.download_all(ws.results()).await.unwrap();

	let bytes = sink.downloads()[0].bytes.clone();
	let zip = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
	let mut names: Vec<&str> = zip.file_names().collect();
	names.sort();
	assert_eq!(names, vec!["shot-pngify-2.png", "shot-pngify.png"]);
}
