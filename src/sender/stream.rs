//! Blocking byte and character sinks that batch into a buffer and emit
//! one partial message per flush.

use crate::frame::Opcode;
use crate::result::{WebSocketError, WebSocketResult};
use crate::sender::{PartOpcode, RemoteEndpoint};
use bytes::{Bytes, BytesMut};
use std::io::{self, Write};

const STREAM_BUFFER_SIZE: usize = 8192;

/// A blocking byte sink over the endpoint.
///
/// Bytes accumulate in an internal buffer. Each flush emits the
/// buffered bytes as one non-final binary fragment, even when the
/// buffer is empty, and `close` emits the final fragment. Writing after
/// close is an error.
pub struct SendStream {
	endpoint: RemoteEndpoint,
	buffer: BytesMut,
	closed: bool,
}

impl SendStream {
	pub(crate) fn new(endpoint: RemoteEndpoint) -> SendStream {
		SendStream {
			endpoint,
			buffer: BytesMut::with_capacity(STREAM_BUFFER_SIZE),
			closed: false,
		}
	}

	/// Emits the buffered bytes as the final fragment and completes the
	/// message. Closing again is a no-op.
	pub fn close(&mut self) -> WebSocketResult<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.emit(true)
	}

	fn emit(&mut self, last: bool) -> WebSocketResult<()> {
		let payload = self.buffer.split().freeze();
		self.endpoint
			.start_message_block(PartOpcode::Frame(Opcode::Binary), payload, last)?;
		self.endpoint.state_machine().complete(last)
	}
}

impl Write for SendStream {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if self.closed {
			return Err(into_io(WebSocketError::IllegalState("stream is closed")));
		}
		let mut written = 0;
		while written < buf.len() {
			if self.buffer.len() == STREAM_BUFFER_SIZE {
				self.flush()?;
			}
			let take = (buf.len() - written).min(STREAM_BUFFER_SIZE - self.buffer.len());
			self.buffer.extend_from_slice(&buf[written..written + take]);
			written += take;
		}
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		if self.closed {
			return Err(into_io(WebSocketError::IllegalState("stream is closed")));
		}
		self.emit(false).map_err(into_io)
	}
}

/// The character analog of [`SendStream`], emitting partial text
/// messages through the endpoint.
pub struct SendWriter {
	endpoint: RemoteEndpoint,
	buffer: String,
	closed: bool,
}

impl SendWriter {
	pub(crate) fn new(endpoint: RemoteEndpoint) -> SendWriter {
		SendWriter {
			endpoint,
			buffer: String::with_capacity(STREAM_BUFFER_SIZE),
			closed: false,
		}
	}

	/// Appends `text`, flushing whenever the internal buffer fills.
	pub fn write_str(&mut self, text: &str) -> WebSocketResult<()> {
		if self.closed {
			return Err(WebSocketError::IllegalState("writer is closed"));
		}
		let mut rest = text;
		while !rest.is_empty() {
			let space = STREAM_BUFFER_SIZE - self.buffer.len();
			let take = char_prefix(rest, space);
			if take == 0 {
				self.flush()?;
				continue;
			}
			self.buffer.push_str(&rest[..take]);
			rest = &rest[take..];
		}
		Ok(())
	}

	/// Emits the buffered characters as one non-final text fragment. An
	/// empty buffer still produces a zero length fragment.
	pub fn flush(&mut self) -> WebSocketResult<()> {
		if self.closed {
			return Err(WebSocketError::IllegalState("writer is closed"));
		}
		self.emit(false)
	}

	/// Emits the buffered characters as the final fragment and
	/// completes the message. Closing again is a no-op.
	pub fn close(&mut self) -> WebSocketResult<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.emit(true)
	}

	fn emit(&mut self, last: bool) -> WebSocketResult<()> {
		let payload = Bytes::copy_from_slice(self.buffer.as_bytes());
		self.buffer.clear();
		self.endpoint.send_partial_text(payload, last)
	}
}

/// Longest prefix of `text`, in bytes, that fits in `max` without
/// splitting a character.
fn char_prefix(text: &str, max: usize) -> usize {
	if text.len() <= max {
		return text.len();
	}
	let mut len = max;
	while len > 0 && !text.is_char_boundary(len) {
		len -= 1;
	}
	len
}

fn into_io(error: WebSocketError) -> io::Error {
	match error {
		WebSocketError::Io(err) => err,
		other => io::Error::new(io::ErrorKind::Other, other),
	}
}
