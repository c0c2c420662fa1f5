//! Fire-and-forget analytics events.
//!
//! Sinks are injected into the converter and archiver. Call sites go through
//! [`emit`], which logs and drops any sink error.

use std::{fmt, time::Duration};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::EventSinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	UploadSelected,
	ConvertStarted,
	ConvertSuccess,
	ConvertError,
	DownloadZip,
	DownloadSingle
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
	#[serde(rename = "type")]
	pub kind: EventKind,
	pub metadata: Map<String, Value>
}

impl Event {
	pub fn new(kind: EventKind) -> Self {
		Self {
			kind,
			metadata: Map::new()
		}
	}

	pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.metadata.insert(key.to_string(), value.into());
		self
	}
}

pub trait EventSink: Send + Sync {
	fn record(&self, event: Event) -> Result<(), EventSinkError>;
}

/// Send `event` to `sink`, discarding any failure.
pub fn emit(sink: &dyn EventSink, event: Event) {
	let kind = event.kind;
	if let Err(e) = sink.record(event) {
		match e {
			EventSinkError::Disabled => {}
			e => warn!(?kind, "failed to log event: {e}")
		}
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
	fn record(&self, _event: Event) -> Result<(), EventSinkError> {
		Ok(())
	}
}

/// Writes events to the `tracing` stream at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
	fn record(&self, event: Event) -> Result<(), EventSinkError> {
		let metadata = Value::Object(event.metadata);
		debug!(kind = ?event.kind, %metadata, "event");
		Ok(())
	}
}

/// POSTs `{"type": ..., "metadata": {...}}` to an HTTP endpoint from the blocking pool.
#[derive(Clone)]
pub struct HttpSink {
	endpoint: String,
	enabled: bool,
	agent: ureq::Agent
}

impl fmt::Debug for HttpSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HttpSink").field("endpoint", &self.endpoint).field("enabled", &self.enabled).finish()
	}
}

impl HttpSink {
	pub fn new(endpoint: impl Into<String>, enabled: bool) -> Self {
		let agent: ureq::Agent = ureq::Agent::config_builder()
			.timeout_global(Some(Duration::from_secs(5)))
			.build()
			.into();
		Self {
			endpoint: endpoint.into(),
			enabled,
			agent
		}
	}
}

impl EventSink for HttpSink {
	fn record(&self, event: Event) -> Result<(), EventSinkError> {
		if !self.enabled {
			return Err(EventSinkError::Disabled);
		}
		let body = serde_json::to_string(&event)?;
		let handle = tokio::runtime::Handle::try_current().map_err(|_| EventSinkError::NoRuntime)?;
		let endpoint = self.endpoint.clone();
		let agent = self.agent.clone();
		let _ = handle.spawn_blocking(move || {
			let res = agent
				.post(endpoint.as_str())
				.header("content-type", "application/json")
				.send(body.as_str());
			if let Err(e) = res {
				warn!("failed to log event: {e}");
			}
		});
		Ok(())
	}
}
