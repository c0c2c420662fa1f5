//! Delivery of completed results: one file directly, several as a ZIP.
//!
//! If the archive cannot be built the files are handed over one by one,
//! spaced out by a fixed delay, so every completed file still arrives.

use std::{
	collections::HashMap,
	fs,
	io::{Cursor, Write},
	path::PathBuf,
	sync::Arc,
	time::Duration
};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
	error::{ArchiveError, DeliveryError},
	events::{Event, EventKind, EventSink, emit},
	workspace::ConversionResult
};

pub const OUTPUT_SUFFIX: &str = "-pngify.png";
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(500);

/// `photo.jpg` -> `photo-pngify.png`. Only the last extension is stripped.
pub fn output_name(original: &str) -> String {
	let base = match original.rsplit_once('.') {
		Some((stem, _)) if !stem.is_empty() => stem,
		_ => original
	};
	format!("{base}{OUTPUT_SUFFIX}")
}

/// `pngify-converted-2024-05-01T12-30-45.zip`
pub fn archive_name(at: DateTime<Utc>) -> String {
	format!("pngify-converted-{}.zip", at.format("%Y-%m-%dT%H-%M-%S"))
}

/// Suffix repeated names with `-2`, `-3`, ... before the extension so no entry overwrites another.
fn unique_names(names: Vec<String>) -> Vec<String> {
	let mut seen: HashMap<String, usize> = HashMap::new();
	names
		.into_iter()
		.map(|name| {
			let n = seen.entry(name.clone()).or_insert(0);
			*n += 1;
			if *n == 1 {
				return name;
			}
			match name.rsplit_once('.') {
				Some((stem, ext)) => format!("{stem}-{n}.{ext}"),
				None => format!("{name}-{n}")
			}
		})
		.collect()
}

pub struct ArchiveEntry<'a> {
	pub name: String,
	pub bytes: &'a [u8]
}

pub trait ArchiveBuilder: Send + Sync {
	fn build(&self, entries: &[ArchiveEntry<'_>]) -> Result<Vec<u8>, ArchiveError>;
}

/// Stored (uncompressed) ZIP; PNG data is already deflated.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipBuilder;

impl ArchiveBuilder for ZipBuilder {
	fn build(&self, entries: &[ArchiveEntry<'_>]) -> Result<Vec<u8>, ArchiveError> {
		let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
		let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
		for entry in entries {
			zip.start_file(entry.name.as_str(), options)?;
			zip.write_all(entry.bytes)?;
		}
		Ok(zip.finish()?.into_inner())
	}
}

/// Where downloads land.
pub trait DownloadSink: Send + Sync {
	fn deliver(&self, name: &str, bytes: &[u8]) -> Result<(), DeliveryError>;
}

/// Writes each download into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
	dir: PathBuf
}

impl DirectorySink {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}
}

impl DownloadSink for DirectorySink {
	fn deliver(&self, name: &str, bytes: &[u8]) -> Result<(), DeliveryError> {
		let path = self.dir.join(name);
		fs::create_dir_all(&self.dir)
			.and_then(|()| fs::write(&path, bytes))
			.map_err(|source| DeliveryError {
				name: name.to_string(),
				source
			})?;
		info!(path = %path.display(), bytes = bytes.len(), "saved");
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
	Nothing,
	Single { name: String },
	Archive { name: String, entries: usize },
	/// Archive failed; one download per file, in this order.
	Individual { names: Vec<String> }
}

pub struct BatchArchiver {
	sink: Arc<dyn DownloadSink>,
	builder: Arc<dyn ArchiveBuilder>,
	events: Arc<dyn EventSink>,
	stagger: Duration
}

impl BatchArchiver {
	pub fn new(sink: Arc<dyn DownloadSink>, events: Arc<dyn EventSink>) -> Self {
		Self {
			sink,
			builder: Arc::new(ZipBuilder),
			events,
			stagger: DEFAULT_STAGGER
		}
	}

	pub fn with_builder(mut self, builder: Arc<dyn ArchiveBuilder>) -> Self {
		self.builder = builder;
		self
	}

	pub fn with_stagger(mut self, stagger: Duration) -> Self {
		self.stagger = stagger;
		self
	}

	/// Deliver every completed result. Pending and failed entries are skipped.
	pub async fn download_all<'a, I>(&self, results: I) -> Result<Delivery, DeliveryError>
	where
		I: IntoIterator<Item = &'a ConversionResult>
	{
		let completed: Vec<(&str, &[u8])> = results
			.into_iter()
			.filter_map(|r| r.output().map(|png| (r.source().name(), png)))
			.collect();

		match completed.as_slice() {
			[] => Ok(Delivery::Nothing),
			[(original, png)] => {
				let name = output_name(original);
				self.sink.deliver(&name, png)?;
				emit(&*self.events, Event::new(EventKind::DownloadSingle));
				Ok(Delivery::Single { name })
			}
			many => {
				let names = unique_names(many.iter().map(|(original, _)| output_name(original)).collect());
				let entries: Vec<ArchiveEntry<'_>> = names
					.into_iter()
					.zip(many)
					.map(|(name, &(_, bytes))| ArchiveEntry { name, bytes })
					.collect();

				let delivery = match self.builder.build(&entries) {
					Ok(zip) => {
						let name = archive_name(Utc::now());
						self.sink.deliver(&name, &zip)?;
						Delivery::Archive {
							name,
							entries: entries.len()
						}
					}
					Err(e) => {
						warn!("building archive failed, delivering {} files one by one: {e}", entries.len());
						self.deliver_staggered(&entries).await?;
						Delivery::Individual {
							names: entries.into_iter().map(|e| e.name).collect()
						}
					}
				};
				emit(&*self.events, Event::new(EventKind::DownloadZip).with("count", many.len()));
				Ok(delivery)
			}
		}
	}

	/// The `i`-th file goes out `i * stagger` after the first. Keeps going past a failed file.
	async fn deliver_staggered(&self, entries: &[ArchiveEntry<'_>]) -> Result<(), DeliveryError> {
		let start = tokio::time::Instant::now();
		let mut first_err = None;
		for (i, entry) in entries.iter().enumerate() {
			tokio::time::sleep_until(start + self.stagger * i as u32).await;
			if let Err(e) = self.sink.deliver(&entry.name, entry.bytes) {
				warn!("{e}");
				first_err.get_or_insert(e);
			}
		}
		match first_err {
			Some(e) => Err(e),
			None => Ok(())
		}
	}
}
