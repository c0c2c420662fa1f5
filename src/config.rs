//! Settings: defaults, then an optional JSON file, then the environment.
//! Command-line flags are applied last by the binary.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
	compose::MaskPolarity,
	convert::ConvertOptions,
	engine::Backend,
	model::DEFAULT_MODEL,
	resize::DEFAULT_MAX_DIMENSION,
	segment::DEFAULT_JPEG_QUALITY
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
	/// Try the GPU, fall back to the CPU.
	#[default]
	Auto,
	/// GPU only; conversions fail when it is unavailable.
	Gpu,
	/// CPU only.
	Cpu
}

impl Device {
	/// Backends to try, in order.
	pub fn strategy(self) -> Vec<Backend> {
		match self {
			Device::Auto => vec![Backend::Accelerated, Backend::Portable],
			Device::Gpu => vec![Backend::Accelerated],
			Device::Cpu => vec![Backend::Portable]
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuBackend {
	/// Platform default (Windows: DirectML, Linux: CUDA).
	#[default]
	Auto,
	/// Windows only, uses DirectML (DirectX 12).
	Directml,
	/// NVIDIA CUDA execution provider (Windows x64, Linux x64/aarch64).
	Cuda
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
	pub enabled: bool,
	pub endpoint: Option<String>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub max_dimension: u32,
	pub jpeg_quality: u8,
	pub remove_background: bool,
	pub model: String,
	pub device: Device,
	pub gpu_backend: GpuBackend,
	pub mask_polarity: MaskPolarity,
	pub allow_download: bool,
	pub stagger_ms: u64,
	pub analytics: AnalyticsSettings
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			max_dimension: DEFAULT_MAX_DIMENSION,
			jpeg_quality: DEFAULT_JPEG_QUALITY,
			remove_background: true,
			model: DEFAULT_MODEL.to_string(),
			device: Device::Auto,
			gpu_backend: GpuBackend::Auto,
			mask_polarity: MaskPolarity::Inverted,
			allow_download: true,
			stagger_ms: 500,
			analytics: AnalyticsSettings::default()
		}
	}
}

impl Settings {
	/// Defaults overlaid with `file` (when given) and the process environment.
	pub fn load(file: Option<&Path>) -> Result<Self> {
		let mut settings = match file {
			Some(path) => Self::from_file(path)?,
			None => Self::default()
		};
		settings.apply_env(|key| std::env::var(key).ok());
		Ok(settings)
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let text = fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
		serde_json::from_str(&text).with_context(|| format!("parse config: {}", path.display()))
	}

	/// `PNGIFY_ANALYTICS_ENABLED` and `PNGIFY_ANALYTICS_ENDPOINT`.
	pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
		if let Some(v) = var("PNGIFY_ANALYTICS_ENABLED") {
			self.analytics.enabled = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
		}
		if let Some(v) = var("PNGIFY_ANALYTICS_ENDPOINT") {
			let v = v.trim();
			self.analytics.endpoint = (!v.is_empty()).then(|| v.to_string());
		}
	}

	pub fn convert_options(&self) -> ConvertOptions {
		ConvertOptions {
			max_dimension: self.max_dimension.max(1),
			jpeg_quality: self.jpeg_quality.clamp(1, 100),
			mask_polarity: self.mask_polarity
		}
	}

	pub fn stagger(&self) -> Duration {
		Duration::from_millis(self.stagger_ms)
	}
}
