//! Multi pass copy of a text message through the shared encode buffer,
//! emitting continuation frames until the text is drained.

use crate::frame::Opcode;
use crate::handler::{SendHandler, SendResult};
use crate::result::WebSocketResult;
use crate::sender::{PartOpcode, RemoteEndpoint, ENCODE_BUFFER_SIZE};
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::io;
use std::sync::{Arc, Weak};

/// Pushes one text send through the endpoint fragment by fragment.
/// Every fragment completion either finishes the send, fails it, or
/// writes the next fragment.
pub(crate) struct TextSendHandler {
	endpoint: RemoteEndpoint,
	handler: Arc<dyn SendHandler>,
	/// The caller's final fragment intent for the whole send.
	is_last: bool,
	this: Weak<TextSendHandler>,
	progress: Mutex<TextProgress>,
}

struct TextProgress {
	remaining: Bytes,
	is_done: bool,
}

impl TextSendHandler {
	pub fn new(
		endpoint: RemoteEndpoint,
		text: Bytes,
		is_last: bool,
		handler: Arc<dyn SendHandler>,
	) -> Arc<TextSendHandler> {
		Arc::new_cyclic(|this| TextSendHandler {
			endpoint,
			handler,
			is_last,
			this: this.clone(),
			progress: Mutex::new(TextProgress {
				remaining: text,
				is_done: false,
			}),
		})
	}

	/// Emits the next fragment. The fragment boundary always falls on a
	/// character boundary, so a scalar is never split across frames.
	pub fn write(&self) -> WebSocketResult<()> {
		let (payload, last) = {
			let mut progress = self.progress.lock();
			let take = fragment_len(&progress.remaining);
			let chunk = progress.remaining.split_to(take);
			progress.is_done = !progress.remaining.has_remaining();

			let mut encode = self.endpoint.encode_buffer().lock();
			encode.clear();
			encode.extend_from_slice(&chunk);
			(encode.split().freeze(), progress.is_done && self.is_last)
		};

		let this = match self.this.upgrade() {
			Some(this) => this,
			None => return Ok(()),
		};
		self.endpoint
			.start_message(PartOpcode::Frame(Opcode::Text), payload, last, this)
	}
}

impl SendHandler for TextSendHandler {
	fn on_result(&self, result: SendResult) {
		if result.is_err() {
			self.handler.on_result(result);
			return;
		}
		if self.endpoint.is_closed() {
			self.handler.on_result(Err(
				io::Error::new(io::ErrorKind::Other, "endpoint closed during a message").into(),
			));
			return;
		}
		if self.progress.lock().is_done {
			match self.endpoint.state_machine().complete(self.is_last) {
				Ok(()) => self.handler.on_result(result),
				Err(err) => self.handler.on_result(Err(err)),
			}
			return;
		}
		if let Err(err) = self.write() {
			self.handler.on_result(Err(err));
		}
	}
}

/// Longest prefix of `remaining` that fits the encode buffer without
/// splitting a UTF-8 sequence.
fn fragment_len(remaining: &Bytes) -> usize {
	if remaining.len() <= ENCODE_BUFFER_SIZE {
		return remaining.len();
	}
	let mut len = ENCODE_BUFFER_SIZE;
	// back off over UTF-8 continuation bytes
	while len > 0 && remaining[len] & 0xC0 == 0x80 {
		len -= 1;
	}
	len
}
