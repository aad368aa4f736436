use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use recall_domain::event::NewRawEvent;

use crate::SourceAdapter;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdapterState {
	Disconnected,
	Connecting,
	Connected,
	Error,
}

#[derive(Clone, Debug)]
pub struct RuntimePolicy {
	pub reconnect_base: Duration,
	pub reconnect_cap: Duration,
	/// Events authored by this identity are the system's own output and are
	/// dropped before they re-enter the pipeline.
	pub self_id: Option<String>,
}
impl RuntimePolicy {
	pub fn from_config(cfg: &recall_config::Adapter) -> Self {
		Self {
			reconnect_base: Duration::from_millis(cfg.reconnect_base_ms),
			reconnect_cap: Duration::from_millis(cfg.reconnect_cap_ms),
			self_id: cfg.self_id.clone(),
		}
	}
}

/// Control handle for one supervised adapter task.
pub struct AdapterHandle {
	state: watch::Receiver<AdapterState>,
	shutdown: watch::Sender<bool>,
	task: JoinHandle<()>,
}
impl AdapterHandle {
	pub fn state(&self) -> AdapterState {
		*self.state.borrow()
	}

	pub async fn stop(self) {
		let _ = self.shutdown.send(true);
		let _ = self.task.await;
	}
}

/// Spawns the supervision task for an adapter: connect with bounded backoff,
/// forward events into the channel, reconnect after stream errors, stop on
/// request or when the source ends the stream cleanly.
pub fn start<A>(
	mut adapter: A,
	policy: RuntimePolicy,
	events: mpsc::Sender<NewRawEvent>,
) -> AdapterHandle
where
	A: SourceAdapter + 'static,
{
	let (state_tx, state_rx) = watch::channel(AdapterState::Disconnected);
	let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
	let task = tokio::spawn(async move {
		let mut backoff = policy.reconnect_base;

		'supervise: while !*shutdown_rx.borrow() {
			let _ = state_tx.send(AdapterState::Connecting);

			match connect_and_verify(&mut adapter).await {
				Ok(()) => {
					let _ = state_tx.send(AdapterState::Connected);

					backoff = policy.reconnect_base;
				},
				Err(err) => {
					tracing::warn!(
						adapter = adapter.name(),
						error = %err,
						"Adapter connect failed; backing off."
					);

					let _ = state_tx.send(AdapterState::Error);

					if wait_or_shutdown(&mut shutdown_rx, backoff).await {
						break 'supervise;
					}

					backoff = (backoff * 2).min(policy.reconnect_cap);

					continue 'supervise;
				},
			}

			loop {
				let event = tokio::select! {
					_ = shutdown_rx.changed() => break 'supervise,
					event = adapter.next_event() => event,
				};

				match event {
					Ok(Some(event)) => {
						if is_self_authored(&event, policy.self_id.as_deref()) {
							tracing::debug!(
								adapter = adapter.name(),
								"Dropping self-authored event."
							);

							continue;
						}
						if events.send(event).await.is_err() {
							// Receiver gone; nobody is ingesting anymore.
							break 'supervise;
						}
					},
					Ok(None) => {
						tracing::info!(adapter = adapter.name(), "Source stream ended.");

						break 'supervise;
					},
					Err(err) => {
						tracing::warn!(
							adapter = adapter.name(),
							error = %err,
							"Adapter stream failed; reconnecting."
						);

						let _ = state_tx.send(AdapterState::Error);

						if wait_or_shutdown(&mut shutdown_rx, backoff).await {
							break 'supervise;
						}

						backoff = (backoff * 2).min(policy.reconnect_cap);

						break;
					},
				}
			}
		}

		if let Err(err) = adapter.disconnect().await {
			tracing::warn!(adapter = adapter.name(), error = %err, "Adapter disconnect failed.");
		}

		let _ = state_tx.send(AdapterState::Disconnected);
	});

	AdapterHandle { state: state_rx, shutdown: shutdown_tx, task }
}

/// A connection only counts once the adapter also reports healthy.
async fn connect_and_verify<A>(adapter: &mut A) -> crate::Result<()>
where
	A: SourceAdapter,
{
	adapter.connect().await?;
	adapter.health_check().await?;

	Ok(())
}

/// Returns true when shutdown was requested while waiting.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
	tokio::select! {
		_ = shutdown.changed() => true,
		_ = tokio::time::sleep(delay) => false,
	}
}

fn is_self_authored(event: &NewRawEvent, self_id: Option<&str>) -> bool {
	let Some(self_id) = self_id else {
		return false;
	};

	["user", "author", "bot_id"].iter().any(|key| {
		event.payload.get(key).and_then(Value::as_str).is_some_and(|value| value == self_id)
	})
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;

	use serde_json::json;
	use time::OffsetDateTime;

	use crate::{BoxFuture, Error, Result, SourceAdapter};

	use super::*;

	enum ScriptItem {
		Event(NewRawEvent),
		StreamError,
	}

	struct ScriptedAdapter {
		script: VecDeque<ScriptItem>,
		connect_failures: u32,
		connects: u32,
	}
	impl ScriptedAdapter {
		fn new(script: Vec<ScriptItem>, connect_failures: u32) -> Self {
			Self { script: script.into(), connect_failures, connects: 0 }
		}
	}
	impl SourceAdapter for ScriptedAdapter {
		fn name(&self) -> &str {
			"scripted"
		}

		fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
			Box::pin(async move {
				if self.connects < self.connect_failures {
					self.connects += 1;

					return Err(Error::Connect("refused".to_string()));
				}

				self.connects += 1;

				Ok(())
			})
		}

		fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
			Box::pin(async move { Ok(()) })
		}

		fn health_check(&mut self) -> BoxFuture<'_, Result<()>> {
			Box::pin(async move { Ok(()) })
		}

		fn next_event(&mut self) -> BoxFuture<'_, Result<Option<NewRawEvent>>> {
			Box::pin(async move {
				match self.script.pop_front() {
					Some(ScriptItem::Event(event)) => Ok(Some(event)),
					Some(ScriptItem::StreamError) => Err(Error::Stream("reset".to_string())),
					None => Ok(None),
				}
			})
		}
	}

	fn event(user: &str, text: &str) -> NewRawEvent {
		NewRawEvent {
			source: "slack".to_string(),
			event_type: "message".to_string(),
			external_id: None,
			payload: json!({ "user": user, "text": text }),
			metadata: json!({}),
			timestamp: OffsetDateTime::now_utc(),
		}
	}

	fn fast_policy(self_id: Option<&str>) -> RuntimePolicy {
		RuntimePolicy {
			reconnect_base: Duration::from_millis(1),
			reconnect_cap: Duration::from_millis(4),
			self_id: self_id.map(|id| id.to_string()),
		}
	}

	#[tokio::test]
	async fn forwards_events_and_drops_self_authored_ones() {
		let adapter = ScriptedAdapter::new(
			vec![
				ScriptItem::Event(event("alice", "first")),
				ScriptItem::Event(event("recall-bot", "own message")),
				ScriptItem::Event(event("bob", "second")),
			],
			0,
		);
		let (tx, mut rx) = mpsc::channel(8);
		let handle = start(adapter, fast_policy(Some("recall-bot")), tx);
		let first = rx.recv().await.expect("first event");
		let second = rx.recv().await.expect("second event");

		assert_eq!(first.payload["text"], "first");
		assert_eq!(second.payload["text"], "second");
		assert!(rx.recv().await.is_none(), "stream end closes the channel");

		handle.stop().await;
	}

	#[tokio::test]
	async fn reconnects_after_a_stream_error() {
		let adapter = ScriptedAdapter::new(
			vec![
				ScriptItem::Event(event("alice", "before")),
				ScriptItem::StreamError,
				ScriptItem::Event(event("alice", "after")),
			],
			0,
		);
		let (tx, mut rx) = mpsc::channel(8);
		let handle = start(adapter, fast_policy(None), tx);

		assert_eq!(rx.recv().await.expect("before").payload["text"], "before");
		assert_eq!(rx.recv().await.expect("after").payload["text"], "after");

		handle.stop().await;
	}

	#[tokio::test]
	async fn retries_connection_failures_with_backoff() {
		let adapter = ScriptedAdapter::new(vec![ScriptItem::Event(event("alice", "hi"))], 2);
		let (tx, mut rx) = mpsc::channel(8);
		let handle = start(adapter, fast_policy(None), tx);

		assert_eq!(rx.recv().await.expect("event").payload["text"], "hi");

		handle.stop().await;
	}

	#[tokio::test]
	async fn stop_reaches_the_disconnected_state() {
		// An empty script ends the stream immediately; stop() must still join.
		let adapter = ScriptedAdapter::new(Vec::new(), 0);
		let (tx, _rx) = mpsc::channel(8);
		let handle = start(adapter, fast_policy(None), tx);

		tokio::time::sleep(Duration::from_millis(20)).await;

		assert_eq!(handle.state(), AdapterState::Disconnected);

		handle.stop().await;
	}
}
