use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::download;

/// What the model's output channels mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
	/// One channel scoring the salient subject.
	Salient,
	/// One channel per semantic class.
	Classes
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
	pub name: &'static str,
	pub url: &'static str,
	/// Square input edge the model was exported for.
	pub input_size: u32,
	pub mean: [f32; 3],
	pub std: [f32; 3],
	pub output: OutputKind
}

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const HALF: [f32; 3] = [0.5, 0.5, 0.5];

pub const DEFAULT_MODEL: &str = "segformer-b0-ade";

const MODELS: &[ModelSpec] = &[
	ModelSpec {
		name: "segformer-b0-ade",
		url: "https://huggingface.co/Xenova/segformer-b0-finetuned-ade-512-512/resolve/main/onnx/model.onnx",
		input_size: 512,
		mean: IMAGENET_MEAN,
		std: IMAGENET_STD,
		output: OutputKind::Classes
	},
	ModelSpec {
		name: "u2netp",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2netp.onnx",
		input_size: 320,
		mean: HALF,
		std: HALF,
		output: OutputKind::Salient
	},
	ModelSpec {
		name: "u2net",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx",
		input_size: 320,
		mean: HALF,
		std: HALF,
		output: OutputKind::Salient
	},
	// ISNet prefers a larger input; slower, finer edges.
	ModelSpec {
		name: "isnet-general-use",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-general-use.onnx",
		input_size: 1024,
		mean: HALF,
		std: HALF,
		output: OutputKind::Salient
	}
];

pub fn model_spec(name: &str) -> Result<ModelSpec> {
	let wanted = name.trim().to_ascii_lowercase();
	match MODELS.iter().find(|m| m.name == wanted) {
		Some(m) => Ok(*m),
		None => {
			let known: Vec<&str> = MODELS.iter().map(|m| m.name).collect();
			bail!("unsupported model: {wanted} (supported: {})", known.join(", "))
		}
	}
}

pub struct ModelInstall {
	pub path: PathBuf,
	pub spec: ModelSpec
}

/// Locate the cached model file, downloading it first when allowed.
pub fn ensure_model(name: &str, allow_download: bool) -> Result<ModelInstall> {
	let spec = model_spec(name)?;
	let path = cache_dir()?.join("models").join(format!("{}.onnx", spec.name));

	if !path.exists() {
		if !allow_download {
			bail!("download required: model {} ({})", spec.name, spec.url);
		}
		info!(model = spec.name, url = spec.url, "downloading model");
		download::download_to_path(spec.url, &path, None)
			.with_context(|| format!("download model {} from {}", spec.name, spec.url))?;
	}

	Ok(ModelInstall { path, spec })
}

/// Per-user cache root; `PNGIFY_CACHE_DIR` overrides it.
pub(crate) fn cache_dir() -> Result<PathBuf> {
	if let Some(dir) = std::env::var_os("PNGIFY_CACHE_DIR") {
		return Ok(PathBuf::from(dir));
	}
	let dirs = directories::ProjectDirs::from("app", "pngify", "pngify")
		.ok_or_else(|| anyhow::anyhow!("unable to resolve user cache directory"))?;
	Ok(dirs.cache_dir().to_path_buf())
}
