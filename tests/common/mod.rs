#![allow(dead_code)]

use std::{
	collections::HashSet,
	io::Cursor,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering}
	}
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::time::Instant;

use pngify::{
	archive::{ArchiveBuilder, ArchiveEntry, DownloadSink},
	compose::MaskPolarity,
	convert::{ConvertOptions, Converter},
	engine::{Backend, EncodedImage, EngineFactory, InferenceEngine, LabeledMask, SegmentationMask},
	error::{ArchiveError, DeliveryError, EventSinkError},
	events::{Event, EventKind, EventSink},
	handles::HandleRegistry,
	segment::SegmentationClient,
	source::{MediaType, SourceImage}
};

pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
	let img = RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 11) as u8, (y * 3) as u8, 200, 255]));
	let mut out = Cursor::new(Vec::new());
	img.write_to(&mut out, ImageFormat::Png).unwrap();
	out.into_inner()
}

pub fn png_source(name: &str, w: u32, h: u32) -> SourceImage {
	SourceImage::new(name, MediaType::Png, png_bytes(w, h))
}

/// Uniform-score engine that measures how many calls overlap.
#[derive(Default)]
pub struct GaugeEngine {
	pub score: f32,
	pub calls: AtomicUsize,
	in_flight: AtomicUsize,
	pub max_in_flight: AtomicUsize
}

impl GaugeEngine {
	pub fn with_score(score: f32) -> Self {
		Self {
			score,
			..Self::default()
		}
	}
}

#[async_trait]
impl InferenceEngine for GaugeEngine {
	async fn infer(&self, image: &EncodedImage) -> Result<Vec<LabeledMask>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);
		for _ in 0..5 {
			tokio::task::yield_now().await;
		}
		self.in_flight.fetch_sub(1, Ordering::SeqCst);

		Ok(vec![LabeledMask {
			label: "wall".into(),
			score: None,
			mask: Some(SegmentationMask {
				width: image.width,
				height: image.height,
				values: vec![self.score; image.pixel_count()]
			})
		}])
	}
}

/// Hands out one shared engine; backends listed in `failing` refuse to start.
pub struct GaugeFactory {
	pub engine: Arc<GaugeEngine>,
	failing: HashSet<Backend>,
	creates: Mutex<Vec<Backend>>
}

impl GaugeFactory {
	pub fn new(engine: Arc<GaugeEngine>, failing: &[Backend]) -> Self {
		Self {
			engine,
			failing: failing.iter().copied().collect(),
			creates: Mutex::new(Vec::new())
		}
	}

	pub fn creates(&self) -> Vec<Backend> {
		self.creates.lock().unwrap().clone()
	}
}

#[async_trait]
impl EngineFactory for GaugeFactory {
	async fn create(&self, backend: Backend) -> Result<Arc<dyn InferenceEngine>> {
		self.creates.lock().unwrap().push(backend);
		tokio::task::yield_now().await;
		if self.failing.contains(&backend) {
			bail!("{backend} device lost");
		}
		Ok(self.engine.clone())
	}
}

#[derive(Default)]
pub struct EventLog {
	events: Mutex<Vec<Event>>
}

impl EventLog {
	pub fn kinds(&self) -> Vec<EventKind> {
		self.events.lock().unwrap().iter().map(|e| e.kind).collect()
	}

	pub fn last(&self, kind: EventKind) -> Option<Event> {
		self.events.lock().unwrap().iter().rev().find(|e| e.kind == kind).cloned()
	}
}

impl EventSink for EventLog {
	fn record(&self, event: Event) -> Result<(), EventSinkError> {
		self.events.lock().unwrap().push(event);
		Ok(())
	}
}

/// A delivered download and the (tokio) time it arrived.
#[derive(Debug, Clone)]
pub struct Download {
	pub name: String,
	pub bytes: Vec<u8>,
	pub at: Instant
}

/// Keeps downloads in memory; names in `refuse` fail.
#[derive(Default)]
pub struct MemorySink {
	downloads: Mutex<Vec<Download>>,
	refuse: HashSet<String>
}

impl MemorySink {
	pub fn refusing(names: &[&str]) -> Self {
		Self {
			refuse: names.iter().map(|n| n.to_string()).collect(),
			..Self::default()
		}
	}

	pub fn downloads(&self) -> Vec<Download> {
		self.downloads.lock().unwrap().clone()
	}
}

impl DownloadSink for MemorySink {
	fn deliver(&self, name: &str, bytes: &[u8]) -> Result<(), DeliveryError> {
		if self.refuse.contains(name) {
			return Err(DeliveryError {
				name: name.to_string(),
				source: std::io::Error::other("disk full")
			});
		}
		self.downloads.lock().unwrap().push(Download {
			name: name.to_string(),
			bytes: bytes.to_vec(),
			at: Instant::now()
		});
		Ok(())
	}
}

/// Archive builder that always fails.
pub struct BrokenArchive;

impl ArchiveBuilder for BrokenArchive {
	fn build(&self, _entries: &[ArchiveEntry<'_>]) -> Result<Vec<u8>, ArchiveError> {
		Err(ArchiveError::Other("out of memory".into()))
	}
}

pub struct Rig {
	pub converter: Arc<Converter>,
	pub factory: Arc<GaugeFactory>,
	pub engine: Arc<GaugeEngine>,
	pub events: Arc<EventLog>
}

pub fn rig(score: f32, strategy: Vec<Backend>, failing: &[Backend], polarity: MaskPolarity) -> Rig {
	let engine = Arc::new(GaugeEngine::with_score(score));
	let factory = Arc::new(GaugeFactory::new(engine.clone(), failing));
	let segmenter = Arc::new(SegmentationClient::new(factory.clone(), strategy));
	let events = Arc::new(EventLog::default());
	let options = ConvertOptions {
		mask_polarity: polarity,
		..ConvertOptions::default()
	};
	let converter = Arc::new(Converter::new(options, segmenter, events.clone(), HandleRegistry::new()));
	Rig {
		converter,
		factory,
		engine,
		events
	}
}
