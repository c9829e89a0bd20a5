//! Chunked, callback driven copy of one frame through the shared
//! output buffer.

use crate::handler::{SendHandler, SendResult};
use crate::sender::{RemoteEndpoint, OUTPUT_BUFFER_SIZE};
use bytes::{Buf, BufMut, Bytes};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Writes header and payload through the endpoint's output buffer,
/// handing the buffer to the transport whenever it fills. Every hand
/// off suspends the copy; the completion callback resumes it where it
/// left off.
///
/// Used whenever batching is allowed or the frame is masked. Masking is
/// applied while copying, since the caller's payload must stay
/// untouched.
pub(crate) struct OutputBufferHandler {
	endpoint: RemoteEndpoint,
	handler: Arc<dyn SendHandler>,
	mask: Option<[u8; 4]>,
	/// With batching the frame may stay in the output buffer; without
	/// it the buffer must reach the transport before completion.
	flush_required: bool,
	this: Weak<OutputBufferHandler>,
	progress: Mutex<Progress>,
}

/// Resumption state carried across transport suspensions.
struct Progress {
	header: Bytes,
	payload: Bytes,
	/// Position in the masking key, cumulative across the whole frame.
	mask_index: usize,
}

impl OutputBufferHandler {
	pub fn new(
		endpoint: RemoteEndpoint,
		handler: Arc<dyn SendHandler>,
		header: Bytes,
		payload: Bytes,
		mask: Option<[u8; 4]>,
		flush_required: bool,
	) -> Arc<OutputBufferHandler> {
		Arc::new_cyclic(|this| OutputBufferHandler {
			endpoint,
			handler,
			mask,
			flush_required,
			this: this.clone(),
			progress: Mutex::new(Progress {
				header,
				payload,
				mask_index: 0,
			}),
		})
	}

	/// Copies as much of the frame as fits into the output buffer and
	/// either finishes or hands the buffer to the transport and waits
	/// to be resumed.
	pub fn write(&self) {
		let mut progress = self.progress.lock();
		let mut output = self.endpoint.output_buffer().lock();

		// the header goes first
		let space = OUTPUT_BUFFER_SIZE - output.len();
		let take = progress.header.remaining().min(space);
		let chunk = progress.header.split_to(take);
		output.extend_from_slice(&chunk);
		if progress.header.has_remaining() {
			let full = output.split().freeze();
			drop(output);
			drop(progress);
			self.hand_off(full);
			return;
		}

		// then the payload, masked while copying if need be
		let space = OUTPUT_BUFFER_SIZE - output.len();
		let take = progress.payload.remaining().min(space);
		match self.mask {
			None => {
				let chunk = progress.payload.split_to(take);
				output.extend_from_slice(&chunk);
			}
			Some(mask) => {
				let mut index = progress.mask_index;
				for _ in 0..take {
					let byte = progress.payload.get_u8();
					output.put_u8(byte ^ mask[index]);
					index = (index + 1) % 4;
				}
				progress.mask_index = index;
			}
		}
		if progress.payload.has_remaining() {
			let full = output.split().freeze();
			drop(output);
			drop(progress);
			self.hand_off(full);
			return;
		}

		if self.flush_required {
			let full = output.split().freeze();
			drop(output);
			drop(progress);
			if full.is_empty() {
				self.handler.on_result(Ok(()));
			} else {
				self.hand_off(full);
			}
		} else {
			// batched: the frame stays in the output buffer for a later
			// flush and the caller sees the send as complete
			drop(output);
			drop(progress);
			self.handler.on_result(Ok(()));
		}
	}

	fn hand_off(&self, chunk: Bytes) {
		if let Some(this) = self.this.upgrade() {
			self.endpoint.transport().do_write(this, vec![chunk]);
		}
	}
}

impl SendHandler for OutputBufferHandler {
	fn on_result(&self, result: SendResult) {
		match result {
			// the transport took the whole chunk, resume the copy
			Ok(()) => self.write(),
			Err(err) => self.handler.on_result(Err(err)),
		}
	}
}
