//! Object handles for displayable byte buffers.
//!
//! A handle stands in for an object URL: it names a shared buffer while it is
//! alive and is revoked when dropped. Every exit path of a conversion drops the
//! handles it created, so the registry's live count returns to where it started.

use std::{
	collections::HashMap,
	fmt,
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering}
	}
};

use crate::source::MediaType;

const SCHEME: &str = "blob:pngify/";

struct Entry {
	bytes: Arc<[u8]>,
	media_type: MediaType
}

#[derive(Default)]
struct Inner {
	next: AtomicU64,
	live: Mutex<HashMap<u64, Entry>>
}

/// Cheap to clone; all clones share one registry.
#[derive(Clone, Default)]
pub struct HandleRegistry {
	inner: Arc<Inner>
}

impl fmt::Debug for HandleRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandleRegistry").field("live", &self.live_count()).finish()
	}
}

impl HandleRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn create(&self, bytes: Arc<[u8]>, media_type: MediaType) -> ObjectHandle {
		let id = self.inner.next.fetch_add(1, Ordering::Relaxed);
		if let Ok(mut live) = self.inner.live.lock() {
			live.insert(id, Entry { bytes, media_type });
		}
		ObjectHandle {
			id,
			registry: self.clone()
		}
	}

	/// Look up a handle URL. `None` once the handle has been dropped.
	pub fn resolve(&self, url: &str) -> Option<(Arc<[u8]>, MediaType)> {
		let id = url.strip_prefix(SCHEME)?.parse::<u64>().ok()?;
		let live = self.inner.live.lock().ok()?;
		live.get(&id).map(|e| (Arc::clone(&e.bytes), e.media_type.clone()))
	}

	pub fn live_count(&self) -> usize {
		self.inner.live.lock().map(|l| l.len()).unwrap_or(0)
	}

	fn revoke(&self, id: u64) {
		if let Ok(mut live) = self.inner.live.lock() {
			live.remove(&id);
		}
	}
}

/// Revoked on drop.
pub struct ObjectHandle {
	id: u64,
	registry: HandleRegistry
}

impl ObjectHandle {
	pub fn url(&self) -> String {
		format!("{SCHEME}{}", self.id)
	}
}

impl fmt::Debug for ObjectHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ObjectHandle").field(&self.url()).finish()
	}
}

impl Drop for ObjectHandle {
	fn drop(&mut self) {
		self.registry.revoke(self.id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn drop_revokes() {
		let reg = HandleRegistry::new();
		let h = reg.create(Arc::from(vec![1u8, 2, 3]), MediaType::Png);
		let url = h.url();
		assert!(url.starts_with("blob:pngify/"));
		assert_eq!(reg.live_count(), 1);

		let (bytes, ty) = reg.resolve(&url).unwrap();
		assert_eq!(&*bytes, &[1, 2, 3]);
		assert_eq!(ty, MediaType::Png);

		drop(h);
		assert_eq!(reg.live_count(), 0);
		assert!(reg.resolve(&url).is_none());
	}

	#[test]
	fn urls_are_distinct() {
		let reg = HandleRegistry::new();
		let a = reg.create(Arc::from(Vec::new()), MediaType::Png);
		let b = reg.create(Arc::from(Vec::new()), MediaType::Png);
		assert_ne!(a.url(), b.url());
		assert!(reg.resolve("https://example.com/1").is_none());
	}
}
