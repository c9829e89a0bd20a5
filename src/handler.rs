//! Completion primitives shared by every asynchronous send.

use crate::result::{WebSocketError, WebSocketResult};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The outcome of one send operation, delivered to its [`SendHandler`]
/// exactly once.
pub type SendResult = WebSocketResult<()>;

/// Completion callback for a single send operation.
///
/// A handler may be invoked inline from the submitting call or later
/// from whichever thread the transport completes on.
pub trait SendHandler: Send + Sync {
	/// Called exactly once with the outcome of the send.
	fn on_result(&self, result: SendResult);
}

impl<F> SendHandler for F
where
	F: Fn(SendResult) + Send + Sync,
{
	fn on_result(&self, result: SendResult) {
		self(result)
	}
}

/// A [`SendHandler`] that latches its result and releases blocking
/// waiters. The blocking facades submit one of these and park on it.
pub struct SendFuture {
	result: Mutex<Option<SendResult>>,
	done: Condvar,
}

impl SendFuture {
	pub fn new() -> SendFuture {
		SendFuture {
			result: Mutex::new(None),
			done: Condvar::new(),
		}
	}

	/// Waits until the send completes.
	pub fn get(&self) -> SendResult {
		let mut result = self.result.lock();
		loop {
			if let Some(outcome) = result.take() {
				return outcome;
			}
			self.done.wait(&mut result);
		}
	}

	/// Waits until the send completes or the timeout elapses.
	pub fn get_timeout(&self, timeout: Duration) -> SendResult {
		let deadline = Instant::now() + timeout;
		let mut result = self.result.lock();
		loop {
			if let Some(outcome) = result.take() {
				return outcome;
			}
			if self.done.wait_until(&mut result, deadline).timed_out() {
				return Err(WebSocketError::Timeout);
			}
		}
	}
}

impl Default for SendFuture {
	fn default() -> SendFuture {
		SendFuture::new()
	}
}

impl SendHandler for SendFuture {
	fn on_result(&self, result: SendResult) {
		let mut slot = self.result.lock();
		*slot = Some(result);
		self.done.notify_all();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn completed_future_returns_immediately() {
		let future = SendFuture::new();
		future.on_result(Ok(()));
		assert!(future.get().is_ok());
	}

	#[test]
	fn get_waits_for_completion() {
		let future = Arc::new(SendFuture::new());
		let completer = future.clone();
		let worker = thread::spawn(move || {
			thread::sleep(Duration::from_millis(10));
			completer.on_result(Ok(()));
		});
		assert!(future.get().is_ok());
		worker.join().unwrap();
	}

	#[test]
	fn get_timeout_expires() {
		let future = SendFuture::new();
		match future.get_timeout(Duration::from_millis(20)) {
			Err(WebSocketError::Timeout) => (),
			other => panic!("expected timeout, got {:?}", other),
		}
	}

	#[test]
	fn failures_are_latched() {
		let future = SendFuture::new();
		future.on_result(Err(WebSocketError::IllegalState("nope")));
		match future.get_timeout(Duration::from_millis(20)) {
			Err(WebSocketError::IllegalState(_)) => (),
			other => panic!("expected illegal state, got {:?}", other),
		}
	}
}
