use std::{fs, sync::Arc};

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pngify::{
	archive::{BatchArchiver, Delivery, DirectorySink},
	cli,
	config::Settings,
	convert::Converter,
	events::{Event, EventKind, EventSink, HttpSink, TracingSink, emit},
	handles::HandleRegistry,
	onnx::OrtFactory,
	quota::{self, Capability},
	segment::SegmentationClient,
	source::{SourceImage, UploadPolicy},
	workspace::Workspace
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let args = cli::Args::parse();

	// Logs go to stderr; stdout only lists the delivered files.
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();

	if let Err(e) = run(args).await {
		eprintln!("{e:#}");
		std::process::exit(1);
	}
}

async fn run(args: cli::Args) -> Result<()> {
	let mut settings = Settings::load(args.config.as_deref())?;
	args.apply(&mut settings);

	let events: Arc<dyn EventSink> = match (&settings.analytics.endpoint, settings.analytics.enabled) {
		(Some(endpoint), true) => Arc::new(HttpSink::new(endpoint.as_str(), true)),
		_ => Arc::new(TracingSink)
	};

	let mut selection = Vec::with_capacity(args.inputs.len());
	for path in &args.inputs {
		match fs::read(path) {
			Ok(bytes) => selection.push(SourceImage::from_path_bytes(path, bytes)),
			Err(e) => eprintln!("skipping {}: {e}", path.display())
		}
	}

	let (accepted, rejected) = UploadPolicy::default().partition(selection);
	for (name, reason) in &rejected {
		eprintln!("skipping {name}: {reason}");
	}
	// Local runs have no sign-in; every accepted file is admitted.
	let (accepted, admission) = quota::admit_selection(Capability::Unlimited, accepted);
	if admission.truncated {
		warn!("only the first {} files are converted", admission.accepted);
	}
	if accepted.is_empty() {
		bail!("no usable input images");
	}
	emit(&*events, Event::new(EventKind::UploadSelected).with("count", accepted.len()));

	let handles = HandleRegistry::new();
	let mut workspace = Workspace::new(handles.clone());
	for source in accepted {
		workspace.enqueue(source);
	}

	let factory = OrtFactory::new(settings.model.as_str(), settings.gpu_backend, settings.allow_download);
	let segmenter = Arc::new(SegmentationClient::new(Arc::new(factory), settings.device.strategy()));
	let converter = Converter::new(settings.convert_options(), segmenter, Arc::clone(&events), handles);

	let report = converter.process(&mut workspace, settings.remove_background).await;
	for failure in &report.failures {
		eprintln!("{failure}");
	}
	info!("converted {} of {} files", report.completed, workspace.len());
	if report.completed == 0 {
		bail!("no image was converted");
	}

	let archiver = BatchArchiver::new(Arc::new(DirectorySink::new(&args.out_dir)), events).with_stagger(settings.stagger());
	let written = match archiver.download_all(workspace.completed()).await? {
		Delivery::Nothing => Vec::new(),
		Delivery::Single { name } | Delivery::Archive { name, .. } => vec![name],
		Delivery::Individual { names } => {
			warn!("archive unavailable; wrote {} files individually", names.len());
			names
		}
	};
	for name in written {
		println!("{}", args.out_dir.join(name).display());
	}
	Ok(())
}
