//! Segmentation engine backed by an ONNX model run through `ort`.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Luma, RgbImage, imageops::FilterType};
use ndarray::{Array4, ArrayViewD};
use ort::{ep, session::Session, value::TensorRef};
use tracing::{debug, info};

use crate::{
	config::GpuBackend,
	engine::{Backend, EncodedImage, EngineFactory, InferenceEngine, LabeledMask, SegmentationMask},
	model::{self, ModelSpec, OutputKind},
	runtime::{self, RuntimePackage}
};

pub const FOREGROUND_LABEL: &str = "foreground";

/// Opens sessions for one model; the backend picks runtime and execution provider.
#[derive(Debug, Clone)]
pub struct OrtFactory {
	model: String,
	gpu_backend: GpuBackend,
	allow_download: bool
}

impl OrtFactory {
	pub fn new(model: impl Into<String>, gpu_backend: GpuBackend, allow_download: bool) -> Self {
		Self {
			model: model.into(),
			gpu_backend,
			allow_download
		}
	}
}

#[async_trait]
impl EngineFactory for OrtFactory {
	async fn create(&self, backend: Backend) -> Result<Arc<dyn InferenceEngine>> {
		let factory = self.clone();
		let engine = tokio::task::spawn_blocking(move || factory.open(backend))
			.await
			.context("session setup task")??;
		Ok(Arc::new(engine))
	}
}

impl OrtFactory {
	fn open(&self, backend: Backend) -> Result<OrtEngine> {
		let model = model::ensure_model(&self.model, self.allow_download)?;
		let path = &model.path;

		let session = match backend {
			Backend::Accelerated => {
				let package = RuntimePackage::for_gpu(self.gpu_backend)?;
				runtime::init_ort(&runtime::ensure_runtime(package, self.allow_download)?)?;
				let provider = match package {
					RuntimePackage::DirectMl => ep::DirectML::default().build().error_on_failure(),
					_ => ep::CUDA::default().build().error_on_failure()
				};
				Session::builder()
					.context("create ORT session builder")?
					.with_execution_providers([provider])
					.with_context(|| format!("configure {} execution provider", package.pypi_name()))?
					.commit_from_file(path)
					.with_context(|| format!("load onnx model: {}", path.display()))?
			}
			Backend::Portable => {
				// A GPU runtime that is already loaded also runs on the CPU.
				if runtime::loaded().is_none() {
					runtime::init_ort(&runtime::ensure_runtime(RuntimePackage::Cpu, self.allow_download)?)?;
				}
				Session::builder()
					.context("create ORT session builder")?
					.commit_from_file(path)
					.with_context(|| format!("load onnx model: {}", path.display()))?
			}
		};

		info!(model = model.spec.name, %backend, "segmentation session ready");
		Ok(OrtEngine {
			session: Arc::new(Mutex::new(session)),
			spec: model.spec
		})
	}
}

pub struct OrtEngine {
	session: Arc<Mutex<Session>>,
	spec: ModelSpec
}

#[async_trait]
impl InferenceEngine for OrtEngine {
	async fn infer(&self, image: &EncodedImage) -> Result<Vec<LabeledMask>> {
		let session = Arc::clone(&self.session);
		let spec = self.spec;
		let image = image.clone();
		tokio::task::spawn_blocking(move || {
			let mut session = session.lock().map_err(|_| anyhow::anyhow!("onnx session poisoned"))?;
			run(&mut session, &spec, &image)
		})
		.await
		.context("inference task")?
	}
}

fn run(session: &mut Session, spec: &ModelSpec, image: &EncodedImage) -> Result<Vec<LabeledMask>> {
	let rgb = image::load_from_memory_with_format(&image.bytes, ImageFormat::Jpeg)
		.context("decode engine input")?
		.to_rgb8();
	let resized = image::imageops::resize(&rgb, spec.input_size, spec.input_size, FilterType::Lanczos3);
	let input = to_tensor_nchw(&resized, spec);

	let outputs = session
		.run(ort::inputs![TensorRef::from_array_view(&input)?])
		.context("run inference")?;
	if outputs.len() == 0 {
		bail!("model produced no outputs");
	}
	let out = outputs[0].try_extract_array::<f32>().context("extract output tensor")?;
	debug!(shape = ?out.shape(), "model output");

	let maps = ScoreMaps::from_output(out)?;
	let masks = match spec.output {
		OutputKind::Salient => vec![maps.salient()],
		OutputKind::Classes => maps.classes()
	};

	masks
		.into_iter()
		.map(|(label, small)| {
			Ok(LabeledMask {
				label,
				score: Some(small.mean()),
				mask: Some(small.resized(image.width, image.height)?)
			})
		})
		.collect()
}

fn to_tensor_nchw(img: &RgbImage, spec: &ModelSpec) -> Array4<f32> {
	let (w, h) = (img.width() as usize, img.height() as usize);
	let mut t = Array4::<f32>::zeros((1, 3, h, w));
	for (x, y, p) in img.enumerate_pixels() {
		for c in 0..3 {
			t[[0, c, y as usize, x as usize]] = (p[c] as f32 / 255.0 - spec.mean[c]) / spec.std[c];
		}
	}
	t
}

/// Raw model output as `channels` planes of `width * height` scores.
struct ScoreMaps {
	channels: usize,
	width: usize,
	height: usize,
	data: Vec<f32>
}

impl ScoreMaps {
	fn from_output(out: ArrayViewD<'_, f32>) -> Result<Self> {
		let (n, c, h, w) = match out.shape() {
			&[n, c, h, w] => (n, c, h, w),
			&[n, h, w] => (n, 1, h, w),
			other => bail!("unexpected output shape: {other:?}")
		};
		if n != 1 {
			bail!("unexpected batch size: {n} (expected 1)");
		}
		if c == 0 || h == 0 || w == 0 {
			bail!("empty output tensor");
		}
		Ok(Self {
			channels: c,
			width: w,
			height: h,
			data: out.iter().copied().collect()
		})
	}

	fn plane(&self, c: usize) -> &[f32] {
		let len = self.width * self.height;
		&self.data[c * len..(c + 1) * len]
	}

	/// First channel as a probability map. Logits get a sigmoid; probabilities pass through.
	fn salient(&self) -> (String, SmallMask) {
		let plane = self.plane(0);
		let (min, max) = plane
			.iter()
			.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
		let is_prob = min >= -0.01 && max <= 1.01;

		let values = plane
			.iter()
			.map(|&v| {
				let s = if is_prob { v } else { 1.0 / (1.0 + (-v).exp()) };
				s.clamp(0.0, 1.0)
			})
			.collect();
		(FOREGROUND_LABEL.to_string(), self.small(values))
	}

	/// Softmax across channels; one map per class that wins at least one pixel.
	fn classes(&self) -> Vec<(String, SmallMask)> {
		let len = self.width * self.height;
		let mut probs = vec![0f32; self.data.len()];
		let mut present = vec![false; self.channels];

		for i in 0..len {
			let max = (0..self.channels).map(|c| self.data[c * len + i]).fold(f32::NEG_INFINITY, f32::max);
			let mut sum = 0.0;
			for c in 0..self.channels {
				let e = (self.data[c * len + i] - max).exp();
				probs[c * len + i] = e;
				sum += e;
			}
			let mut best = 0;
			for c in 0..self.channels {
				probs[c * len + i] /= sum;
				if probs[c * len + i] > probs[best * len + i] {
					best = c;
				}
			}
			present[best] = true;
		}

		present
			.iter()
			.enumerate()
			.filter(|&(_, &p)| p)
			.map(|(c, _)| (format!("class-{c}"), self.small(probs[c * len..(c + 1) * len].to_vec())))
			.collect()
	}

	fn small(&self, values: Vec<f32>) -> SmallMask {
		SmallMask {
			width: self.width as u32,
			height: self.height as u32,
			values
		}
	}
}

/// A score map at model resolution.
struct SmallMask {
	width: u32,
	height: u32,
	values: Vec<f32>
}

impl SmallMask {
	/// Average score over the map.
	fn mean(&self) -> f32 {
		if self.values.is_empty() {
			return 0.0;
		}
		self.values.iter().sum::<f32>() / self.values.len() as f32
	}

	fn resized(self, width: u32, height: u32) -> Result<SegmentationMask> {
		if (self.width, self.height) == (width, height) {
			return Ok(SegmentationMask {
				width,
				height,
				values: self.values
			});
		}
		let plane: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(self.width, self.height, self.values)
			.ok_or_else(|| anyhow::anyhow!("score map size mismatch"))?;
		let scaled = image::imageops::resize(&plane, width, height, FilterType::Triangle);
		Ok(SegmentationMask {
			width,
			height,
			values: scaled.into_raw().into_iter().map(|v| v.clamp(0.0, 1.0)).collect()
		})
	}
}
