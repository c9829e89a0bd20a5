//! The slice of the enclosing session that the send path can see.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Session user property holding the blocking send timeout in
/// milliseconds. A value of `-1` waits forever; when the property is
/// absent a 20 second default applies.
pub const BLOCKING_SEND_TIMEOUT_PROPERTY: &str = "websocket.remote.blocking-send-timeout";

// Milliseconds, so this is 20 seconds
const DEFAULT_BLOCKING_SEND_TIMEOUT: i64 = 20 * 1000;

/// State shared with the session that owns the connection. The send
/// path only touches it to stamp activity and to read user properties.
pub struct Session {
	last_active: Mutex<Instant>,
	user_properties: Mutex<HashMap<String, i64>>,
}

impl Session {
	pub fn new() -> Session {
		Session {
			last_active: Mutex::new(Instant::now()),
			user_properties: Mutex::new(HashMap::new()),
		}
	}

	/// Stamps the session as active now. Called around every part write
	/// so idle timeouts see sends as activity.
	pub fn update_last_active(&self) {
		*self.last_active.lock() = Instant::now();
	}

	/// The instant of the most recent activity.
	pub fn last_active(&self) -> Instant {
		*self.last_active.lock()
	}

	pub fn set_user_property(&self, key: &str, value: i64) {
		self.user_properties.lock().insert(key.to_owned(), value);
	}

	pub fn user_property(&self, key: &str) -> Option<i64> {
		self.user_properties.lock().get(key).copied()
	}

	pub(crate) fn blocking_send_timeout(&self) -> i64 {
		self.user_property(BLOCKING_SEND_TIMEOUT_PROPERTY)
			.unwrap_or(DEFAULT_BLOCKING_SEND_TIMEOUT)
	}
}

impl Default for Session {
	fn default() -> Session {
		Session::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeout_defaults_to_twenty_seconds() {
		let session = Session::new();
		assert_eq!(session.blocking_send_timeout(), 20_000);
	}

	#[test]
	fn timeout_reads_user_property() {
		let session = Session::new();
		session.set_user_property(BLOCKING_SEND_TIMEOUT_PROPERTY, 250);
		assert_eq!(session.blocking_send_timeout(), 250);
		session.set_user_property(BLOCKING_SEND_TIMEOUT_PROPERTY, -1);
		assert_eq!(session.blocking_send_timeout(), -1);
	}

	#[test]
	fn update_last_active_moves_forward() {
		let session = Session::new();
		let before = session.last_active();
		session.update_last_active();
		assert!(session.last_active() >= before);
	}
}
