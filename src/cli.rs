use std::path::PathBuf;

use clap::Parser;

use crate::{
	compose::MaskPolarity,
	config::{Device, GpuBackend, Settings}
};

#[derive(Debug, Parser)]
#[command(name = "pngify", version, about = "Convert images to PNG, optionally cutting out the background")]
pub struct Args {
	/// Input images (JPEG, PNG, WebP or BMP, up to 10 MB each).
	#[arg(required = true)]
	pub inputs: Vec<PathBuf>,

	/// Directory that receives the PNG, or the ZIP for several files.
	#[arg(short, long, default_value = ".")]
	pub out_dir: PathBuf,

	/// Convert only; skip background removal.
	#[arg(long)]
	pub keep_background: bool,

	/// Longest side of the output, in pixels.
	#[arg(long)]
	pub max_dimension: Option<u32>,

	/// Segmentation model (segformer-b0-ade, u2netp, u2net, isnet-general-use).
	#[arg(short = 'm', long)]
	pub model: Option<String>,

	/// Device selection.
	#[arg(long, value_enum)]
	pub device: Option<Device>,

	/// Which GPU backend to use when the GPU is tried.
	#[arg(long, value_enum)]
	pub gpu_backend: Option<GpuBackend>,

	/// Whether mask scores mark the background (inverted) or the subject (direct).
	#[arg(long, value_enum)]
	pub mask_polarity: Option<MaskPolarity>,

	/// Never download models or runtimes.
	#[arg(long)]
	pub offline: bool,

	/// JSON settings file.
	#[arg(long)]
	pub config: Option<PathBuf>,

	/// More logging (-v debug, -vv trace).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8
}

impl Args {
	/// Flags win over every other settings source.
	pub fn apply(&self, settings: &mut Settings) {
		if self.keep_background {
			settings.remove_background = false;
		}
		if let Some(v) = self.max_dimension {
			settings.max_dimension = v;
		}
		if let Some(v) = &self.model {
			settings.model = v.clone();
		}
		if let Some(v) = self.device {
			settings.device = v;
		}
		if let Some(v) = self.gpu_backend {
			settings.gpu_backend = v;
		}
		if let Some(v) = self.mask_polarity {
			settings.mask_polarity = v;
		}
		if self.offline {
			settings.allow_download = false;
		}
	}

	pub fn log_filter(&self) -> &'static str {
		match self.verbose {
			0 => "pngify=info",
			1 => "pngify=debug",
			_ => "pngify=trace"
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_override_settings() {
		let args = Args::parse_from([
			"pngify",
			"--keep-background",
			"--max-dimension",
			"640",
			"--device",
			"cpu",
			"--mask-polarity",
			"direct",
			"--offline",
			"a.jpg",
			"b.png"
		]);
		let mut s = Settings::default();
		args.apply(&mut s);
		assert!(!s.remove_background);
		assert_eq!(s.max_dimension, 640);
		assert_eq!(s.device, Device::Cpu);
		assert_eq!(s.mask_polarity, MaskPolarity::Direct);
		assert!(!s.allow_download);
		assert_eq!(args.inputs.len(), 2);
	}

	#[test]
	fn absent_flags_leave_settings_alone() {
		let args = Args::parse_from(["pngify", "a.jpg"]);
		let mut s = Settings {
			max_dimension: 300,
			..Settings::default()
		};
		args.apply(&mut s);
		assert_eq!(s, Settings {
			max_dimension: 300,
			..Settings::default()
		});
		assert_eq!(args.log_filter(), "pngify=info");
	}

	#[test]
	fn inputs_are_required() {
		assert!(Args::try_parse_from(["pngify"]).is_err());
	}
}
