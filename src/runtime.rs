//! Locating, downloading and loading the ONNX Runtime shared library.
//!
//! Resolution order: `ORT_DYLIB_PATH`, a cached install, then the matching
//! wheel from PyPI. The library is loaded once per process.

use std::{
	cmp::Ordering,
	env, fs,
	io::{Read, Write},
	path::{Path, PathBuf},
	sync::OnceLock
};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::{
	config::GpuBackend,
	download,
	model::cache_dir,
	pypi::{self, Platform}
};

/// Which ONNX Runtime distribution to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePackage {
	Cpu,
	Cuda,
	DirectMl
}

impl RuntimePackage {
	pub fn pypi_name(self) -> &'static str {
		match self {
			Self::Cpu => "onnxruntime",
			Self::Cuda => "onnxruntime-gpu",
			Self::DirectMl => "onnxruntime-directml"
		}
	}

	/// GPU package for this host. `Auto` prefers a cached one on Windows.
	pub fn for_gpu(gpu_backend: GpuBackend) -> Result<Self> {
		let platform = Platform::current();
		let backend = match gpu_backend {
			GpuBackend::Auto => match platform.os {
				"windows" => {
					if has_cached(Self::DirectMl)? || !has_cached(Self::Cuda)? {
						GpuBackend::Directml
					} else {
						GpuBackend::Cuda
					}
				}
				"linux" => GpuBackend::Cuda,
				_ => GpuBackend::Auto
			},
			other => other
		};

		match backend {
			GpuBackend::Directml => {
				if platform.os != "windows" {
					bail!("DirectML backend is only supported on Windows");
				}
				Ok(Self::DirectMl)
			}
			GpuBackend::Cuda => {
				let ok = matches!(
					(platform.os, platform.arch),
					("windows", "x86_64") | ("linux", "x86_64") | ("linux", "aarch64")
				);
				if !ok {
					bail!("CUDA backend not supported on this platform ({}/{})", platform.os, platform.arch);
				}
				Ok(Self::Cuda)
			}
			GpuBackend::Auto => bail!("GPU backend not supported on this platform ({}/{})", platform.os, platform.arch)
		}
	}
}

pub struct RuntimeInstall {
	pub main_lib: PathBuf
}

static ORT_MAIN_LIB: OnceLock<PathBuf> = OnceLock::new();

/// The library this process already loaded, if any.
pub fn loaded() -> Option<&'static Path> {
	ORT_MAIN_LIB.get().map(PathBuf::as_path)
}

pub fn ensure_runtime(package: RuntimePackage, allow_download: bool) -> Result<RuntimeInstall> {
	if let Some(path) = env::var_os("ORT_DYLIB_PATH") {
		let main_lib = PathBuf::from(path);
		if !main_lib.exists() {
			bail!("ORT_DYLIB_PATH points to a missing file: {}", main_lib.display());
		}
		return Ok(RuntimeInstall { main_lib });
	}

	let platform = Platform::current();
	let pkg_dir = package_dir(package)?;

	if let Some(main_lib) = find_any_installed_lib(platform.os, &pkg_dir)? {
		debug!(path = %main_lib.display(), "using cached onnxruntime");
		return Ok(RuntimeInstall { main_lib });
	}

	let name = package.pypi_name();
	if !allow_download {
		bail!("download required: runtime package {name}");
	}

	let project = pypi::fetch_project(name)?;
	let wheel = pypi::select_wheel(&project, platform)?;

	let base = pkg_dir.join(&project.info.version);
	let wheel_path = base.join(&wheel.filename);
	let lib_dir = base.join("lib");

	if !wheel_path.exists() {
		info!(package = name, version = %project.info.version, "downloading onnxruntime");
		download::download_to_path(&wheel.url, &wheel_path, Some(&wheel.digests.sha256))
			.with_context(|| format!("download wheel: {}", wheel.filename))?;
	}

	extract_libs_from_wheel(&wheel_path, &lib_dir)?;

	let main_lib = find_main_lib(platform.os, &lib_dir)
		.ok_or_else(|| anyhow::anyhow!("unable to find ONNX Runtime library after extraction in {}", lib_dir.display()))?;
	Ok(RuntimeInstall { main_lib })
}

/// Load the library. A second call with a different library is an error.
pub fn init_ort(rt: &RuntimeInstall) -> Result<()> {
	if let Some(p) = ORT_MAIN_LIB.get() {
		if p != &rt.main_lib {
			bail!(
				"ONNX Runtime is already initialized with {}. Restart required to switch to {}.",
				p.display(),
				rt.main_lib.display()
			);
		}
		return Ok(());
	}

	// Must happen before any `Session` is created.
	let builder = ort::init_from(&rt.main_lib).with_context(|| format!("load onnxruntime from {}", rt.main_lib.display()))?;
	builder.commit();
	let _ = ORT_MAIN_LIB.set(rt.main_lib.clone());
	info!(path = %rt.main_lib.display(), "onnxruntime loaded");
	Ok(())
}

fn package_dir(package: RuntimePackage) -> Result<PathBuf> {
	Ok(cache_dir()?.join("onnxruntime").join(package.pypi_name()))
}

fn has_cached(package: RuntimePackage) -> Result<bool> {
	let os = Platform::current().os;
	let dir = package_dir(package)?;
	if !dir.exists() {
		return Ok(false);
	}
	let rd = fs::read_dir(&dir).with_context(|| format!("read cache dir: {}", dir.display()))?;
	Ok(rd.flatten().any(|ent| find_main_lib(os, &ent.path().join("lib")).is_some()))
}

fn main_lib_name(os: &str) -> &'static str {
	match os {
		"windows" => "onnxruntime.dll",
		"macos" => "libonnxruntime.dylib",
		_ => "libonnxruntime.so"
	}
}

fn is_main_lib(os: &str, file_name: &str) -> bool {
	match os {
		"windows" => file_name == "onnxruntime.dll",
		"macos" => file_name.starts_with("libonnxruntime") && file_name.ends_with(".dylib"),
		_ => file_name.starts_with("libonnxruntime.so")
	}
}

/// The exact library name if present, otherwise the largest versioned variant.
fn find_main_lib(os: &str, lib_dir: &Path) -> Option<PathBuf> {
	let exact = lib_dir.join(main_lib_name(os));
	if exact.exists() {
		return Some(exact);
	}

	fs::read_dir(lib_dir)
		.ok()?
		.flatten()
		.filter(|ent| {
			let name = ent.file_name().to_string_lossy().to_ascii_lowercase();
			is_main_lib(os, &name)
		})
		.max_by_key(|ent| ent.metadata().map(|m| m.len()).unwrap_or(0))
		.map(|ent| ent.path())
}

fn is_runtime_lib_file(name: &str) -> bool {
	let lower = name.to_ascii_lowercase();
	lower.ends_with(".dll") || lower.ends_with(".so") || lower.contains(".so.") || lower.ends_with(".dylib")
}

/// Copy the shared libraries under `*/capi/` out of the wheel.
fn extract_libs_from_wheel(wheel_path: &Path, lib_dir: &Path) -> Result<()> {
	fs::create_dir_all(lib_dir).with_context(|| format!("create lib dir: {}", lib_dir.display()))?;

	let file = fs::File::open(wheel_path).with_context(|| format!("open wheel: {}", wheel_path.display()))?;
	let mut zip = zip::ZipArchive::new(file).context("open zip archive")?;

	for i in 0..zip.len() {
		let mut entry = zip.by_index(i).context("read zip entry")?;
		if entry.is_dir() {
			continue;
		}
		let name = entry.name().replace('\\', "/");
		if !name.contains("/capi/") || !is_runtime_lib_file(&name) {
			continue;
		}

		let base = Path::new(&name)
			.file_name()
			.and_then(|s| s.to_str())
			.ok_or_else(|| anyhow::anyhow!("invalid zip entry name: {name}"))?;
		let dst = lib_dir.join(base);
		if dst.exists() {
			continue;
		}

		let mut buf = Vec::new();
		entry.read_to_end(&mut buf).context("read zip entry bytes")?;
		let mut out = fs::File::create(&dst).with_context(|| format!("create file: {}", dst.display()))?;
		out.write_all(&buf).context("write extracted file")?;
	}

	Ok(())
}

/// Newest cached version with a usable library. Finishes an interrupted extraction.
fn find_any_installed_lib(os: &str, pkg_dir: &Path) -> Result<Option<PathBuf>> {
	if !pkg_dir.exists() {
		return Ok(None);
	}

	let mut versions: Vec<PathBuf> = fs::read_dir(pkg_dir)
		.with_context(|| format!("read cache dir: {}", pkg_dir.display()))?
		.flatten()
		.map(|ent| ent.path())
		.filter(|p| p.is_dir())
		.collect();
	versions.sort_by(|a, b| cmp_versions(dir_name(b), dir_name(a)));

	for vdir in versions {
		let lib_dir = vdir.join("lib");
		if let Some(main) = find_main_lib(os, &lib_dir) {
			return Ok(Some(main));
		}
		if let Some(wheel) = find_wheel(&vdir)? {
			extract_libs_from_wheel(&wheel, &lib_dir)?;
			if let Some(main) = find_main_lib(os, &lib_dir) {
				return Ok(Some(main));
			}
		}
	}

	Ok(None)
}

fn find_wheel(dir: &Path) -> Result<Option<PathBuf>> {
	let rd = fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))?;
	Ok(rd.flatten().map(|ent| ent.path()).find(|p| {
		p.is_file() && p.extension().and_then(|s| s.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("whl"))
	}))
}

fn dir_name(p: &Path) -> &str {
	p.file_name().and_then(|s| s.to_str()).unwrap_or("")
}

fn cmp_versions(a: &str, b: &str) -> Ordering {
	let pa = version_prefix(a);
	let pb = version_prefix(b);
	for i in 0..pa.len().max(pb.len()) {
		match pa.get(i).copied().unwrap_or(0).cmp(&pb.get(i).copied().unwrap_or(0)) {
			Ordering::Equal => continue,
			ord => return ord
		}
	}
	a.cmp(b)
}

/// `1.24.1.post1` -> `[1, 24, 1]`
fn version_prefix(s: &str) -> Vec<u64> {
	s.split('.')
		.map_while(|part| {
			let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
			digits.parse::<u64>().ok()
		})
		.collect()
}
