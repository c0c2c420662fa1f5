//! Just enough of the PyPI JSON API to pick an ONNX Runtime wheel.

use std::{collections::HashMap, io::Read};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Project {
	pub info: Info,
	pub releases: HashMap<String, Vec<ReleaseFile>>
}

#[derive(Debug, Deserialize)]
pub struct Info {
	pub version: String
}

#[derive(Debug, Deserialize)]
pub struct ReleaseFile {
	pub filename: String,
	pub url: String,
	pub packagetype: String,
	pub digests: Digests
}

#[derive(Debug, Deserialize)]
pub struct Digests {
	pub sha256: String
}

/// Host platform as wheel tags spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
	pub os: &'static str,
	pub arch: &'static str
}

impl Platform {
	pub fn current() -> Self {
		let os = match std::env::consts::OS {
			"windows" => "windows",
			"macos" => "macos",
			_ => "linux"
		};
		Self {
			os,
			arch: std::env::consts::ARCH
		}
	}

	fn matches(&self, filename: &str) -> bool {
		match (self.os, self.arch) {
			("windows", "x86_64") => filename.ends_with("win_amd64.whl"),
			("windows", "aarch64") => filename.ends_with("win_arm64.whl"),
			("linux", "x86_64") => filename.ends_with("x86_64.whl") && filename.contains("manylinux"),
			("linux", "aarch64") => filename.ends_with("aarch64.whl") && filename.contains("manylinux"),
			("macos", "aarch64") => filename.ends_with("arm64.whl") && filename.contains("macosx"),
			("macos", "x86_64") => filename.ends_with("x86_64.whl") && filename.contains("macosx"),
			_ => false
		}
	}
}

pub fn fetch_project(name: &str) -> Result<Project> {
	let url = format!("https://pypi.org/pypi/{name}/json");
	let resp = ureq::get(&url).call().with_context(|| format!("GET {url}"))?;
	let status = resp.status().as_u16();
	if status / 100 != 2 {
		bail!("pypi request failed (HTTP {status}): {url}");
	}
	let mut body = String::new();
	resp.into_body()
		.into_reader()
		.read_to_string(&mut body)
		.context("read pypi json")?;
	serde_json::from_str(&body).context("parse pypi json")
}

/// First wheel of the latest release built for `platform`, by filename order.
pub fn select_wheel<'a>(project: &'a Project, platform: Platform) -> Result<&'a ReleaseFile> {
	let version = &project.info.version;
	let files = project
		.releases
		.get(version)
		.with_context(|| format!("missing releases entry for version {version}"))?;

	let mut wheels: Vec<&ReleaseFile> = files.iter().filter(|f| f.packagetype == "bdist_wheel").collect();
	wheels.sort_by(|a, b| a.filename.cmp(&b.filename));

	wheels
		.into_iter()
		.find(|f| platform.matches(&f.filename))
		.with_context(|| format!("no wheel found for {}/{} in {version}", platform.os, platform.arch))
}
