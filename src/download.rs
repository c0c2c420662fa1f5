use std::{
	fs::{self, File},
	io::{Read, Write},
	path::Path,
	time::Instant
};

use anyhow::{Context, Result, bail};
use sha2::Digest as _;
use tracing::debug;

/// Stream `url` into `dst` through a `.part` file, checking the sha256 when one is given.
pub fn download_to_path(url: &str, dst: &Path, sha256_hex: Option<&str>) -> Result<()> {
	if let Some(parent) = dst.parent() {
		fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
	}

	let tmp = dst.with_extension("part");
	let _ = fs::remove_file(&tmp);

	let resp = ureq::get(url).call().with_context(|| format!("GET {url}"))?;
	let status = resp.status().as_u16();
	if status / 100 != 2 {
		bail!("download failed (HTTP {status}): {url}");
	}

	let total = resp
		.headers()
		.get(ureq::http::header::CONTENT_LENGTH)
		.and_then(|v| v.to_str().ok())
		.and_then(|s| s.parse::<u64>().ok());

	let mut reader = resp.into_body().into_reader();
	let mut file = File::create(&tmp).with_context(|| format!("create file: {}", tmp.display()))?;
	let mut hasher = sha256_hex.map(|_| sha2::Sha256::new());

	let mut buf = vec![0u8; 64 * 1024];
	let mut downloaded: u64 = 0;
	let start = Instant::now();
	let mut last = Instant::now();

	loop {
		let n = reader.read(&mut buf).context("read response body")?;
		if n == 0 {
			break;
		}
		let chunk = &buf[..n];
		downloaded += n as u64;
		if let Some(h) = hasher.as_mut() {
			h.update(chunk);
		}
		file.write_all(chunk).context("write file")?;

		if last.elapsed().as_millis() >= 1000 {
			debug!(url, downloaded, total, "downloading");
			last = Instant::now();
		}
	}
	file.flush().context("flush file")?;
	debug!(url, downloaded, secs = start.elapsed().as_secs_f64(), "download finished");

	if let (Some(expected), Some(h)) = (sha256_hex, hasher) {
		let got = hex::encode(h.finalize());
		if !eq_hex(expected, &got) {
			bail!("sha256 mismatch for {url}: expected {expected}, got {got}");
		}
	}

	fs::rename(&tmp, dst).with_context(|| format!("rename {} -> {}", tmp.display(), dst.display()))?;
	Ok(())
}

fn eq_hex(a: &str, b: &str) -> bool {
	a.trim().trim_start_matches("0x").eq_ignore_ascii_case(b.trim().trim_start_matches("0x"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hex_compare_ignores_case_and_prefix() {
		assert!(eq_hex("0xABcd", "abcd"));
		assert!(eq_hex(" abcd ", "ABCD"));
		assert!(!eq_hex("abcd", "abce"));
	}
}
