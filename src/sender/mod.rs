//! The send half of one WebSocket session.
//!
//! Public sends validate against the state machine, become
//! [`MessagePart`]s and either start writing immediately or wait in the
//! part queue. Each part is framed by `write_message_part`, pushed to
//! the transport (directly, or through the output buffer pump when
//! masking or batching demand it) and finished by `end_message`, which
//! starts the next queued part and only then notifies the caller.

mod pump;
mod state;
mod stream;
mod text;

pub use self::stream::{SendStream, SendWriter};

use self::pump::OutputBufferHandler;
use self::state::StateMachine;
use self::text::TextSendHandler;
use crate::encoder::{self, AnyEncoder, EncoderEntry};
use crate::frame::header::{self, DataFrameFlags, DataFrameHeader};
use crate::frame::Opcode;
use crate::handler::{SendFuture, SendHandler, SendResult};
use crate::result::{WebSocketError, WebSocketResult};
use crate::session::Session;
use crate::transport::Transport;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Max size of a WebSocket frame header is 14 bytes
const HEADER_BUFFER_SIZE: usize = 14;
pub(crate) const OUTPUT_BUFFER_SIZE: usize = 8192;
pub(crate) const ENCODE_BUFFER_SIZE: usize = 8192;

/// Opcode of one queued part. `Flush` commits batched bytes to the
/// transport and never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartOpcode {
	Frame(Opcode),
	Flush,
}

/// One frame queued for emission. Immutable once built; the stored
/// handler is always the end-of-message wrapper so completion drives
/// the queue.
pub(crate) struct MessagePart {
	op: PartOpcode,
	payload: Bytes,
	last: bool,
	handler: Arc<dyn SendHandler>,
}

/// Fields guarded by the message part lock.
struct PartQueue {
	in_progress: bool,
	queue: VecDeque<MessagePart>,
	/// True between the first non-final data frame of a message and its
	/// final frame.
	fragmented: bool,
	/// Whether the in-flight fragmented message is text.
	text: bool,
	// Staged values committed when the current part's write completes,
	// because the write is asynchronous.
	next_fragmented: bool,
	next_text: bool,
}

struct Inner {
	transport: Box<dyn Transport>,
	session: Arc<Session>,
	state_machine: StateMachine,
	parts: Mutex<PartQueue>,
	closed: AtomicBool,
	batching_allowed: AtomicBool,
	send_timeout: AtomicI64,
	header_buffer: Mutex<BytesMut>,
	output_buffer: Mutex<BytesMut>,
	encode_buffer: Mutex<BytesMut>,
	encoders: Vec<EncoderEntry>,
}

/// The send half of one WebSocket session.
///
/// Cloning is cheap and yields another handle onto the same endpoint.
/// Callers serialise their own data sends; overlapping ones are
/// rejected by the sender state machine rather than waited out.
#[derive(Clone)]
pub struct RemoteEndpoint {
	inner: Arc<Inner>,
}

impl RemoteEndpoint {
	/// Builds the endpoint over `transport`. Every encoder is
	/// initialised up front; a failure aborts construction.
	pub fn new(
		transport: Box<dyn Transport>,
		session: Arc<Session>,
		encoders: Vec<EncoderEntry>,
	) -> WebSocketResult<RemoteEndpoint> {
		for entry in &encoders {
			if let Err(err) = entry.encoder().init() {
				return Err(WebSocketError::Deployment(format!(
					"encoder for {} failed to initialise: {}",
					entry.type_name(),
					err
				)));
			}
		}
		Ok(RemoteEndpoint {
			inner: Arc::new(Inner {
				transport,
				session,
				state_machine: StateMachine::new(),
				parts: Mutex::new(PartQueue {
					in_progress: false,
					queue: VecDeque::new(),
					fragmented: false,
					text: false,
					next_fragmented: false,
					next_text: false,
				}),
				closed: AtomicBool::new(false),
				batching_allowed: AtomicBool::new(false),
				send_timeout: AtomicI64::new(-1),
				header_buffer: Mutex::new(BytesMut::with_capacity(HEADER_BUFFER_SIZE)),
				output_buffer: Mutex::new(BytesMut::with_capacity(OUTPUT_BUFFER_SIZE)),
				encode_buffer: Mutex::new(BytesMut::with_capacity(ENCODE_BUFFER_SIZE)),
				encoders,
			}),
		})
	}

	// ------------------------------------------------------- binary

	/// Sends `data` as a single binary message, blocking until the
	/// write completes or the blocking send timeout expires.
	pub fn send_bytes(&self, data: Bytes) -> WebSocketResult<()> {
		self.inner.state_machine.binary_start()?;
		self.start_message_block(PartOpcode::Frame(Opcode::Binary), data, true)?;
		self.inner.state_machine.complete(true)
	}

	/// Sends `data` as a single binary message, resolving the returned
	/// future when the write completes.
	pub fn send_bytes_by_future(&self, data: Bytes) -> WebSocketResult<Arc<SendFuture>> {
		let future = Arc::new(SendFuture::new());
		self.send_bytes_by_completion(data, future.clone())?;
		Ok(future)
	}

	/// Sends `data` as a single binary message, notifying `handler`
	/// when the write completes.
	pub fn send_bytes_by_completion(
		&self,
		data: Bytes,
		handler: Arc<dyn SendHandler>,
	) -> WebSocketResult<()> {
		let handler = Arc::new(StateUpdateHandler {
			endpoint: self.clone(),
			handler,
		});
		self.inner.state_machine.binary_start()?;
		self.start_message(PartOpcode::Frame(Opcode::Binary), data, true, handler)
	}

	/// Sends one fragment of a binary message, blocking like
	/// [`send_bytes`](RemoteEndpoint::send_bytes). The message stays
	/// open until a fragment is sent with `last` set.
	pub fn send_partial_bytes(&self, fragment: Bytes, last: bool) -> WebSocketResult<()> {
		self.inner.state_machine.binary_partial_start()?;
		self.start_message_block(PartOpcode::Frame(Opcode::Binary), fragment, last)?;
		self.inner.state_machine.complete(last)
	}

	// --------------------------------------------------------- text

	/// Sends `text` as a single text message, blocking until every
	/// fragment is written.
	pub fn send_string(&self, text: &str) -> WebSocketResult<()> {
		self.inner.state_machine.text_start()?;
		self.send_partial_text(Bytes::copy_from_slice(text.as_bytes()), true)
	}

	/// Sends `text` as a single text message, resolving the returned
	/// future when the final fragment completes.
	pub fn send_string_by_future(&self, text: &str) -> WebSocketResult<Arc<SendFuture>> {
		let future = Arc::new(SendFuture::new());
		self.send_string_by_completion(text, future.clone())?;
		Ok(future)
	}

	/// Sends `text` as a single text message, notifying `handler` when
	/// the final fragment completes.
	pub fn send_string_by_completion(
		&self,
		text: &str,
		handler: Arc<dyn SendHandler>,
	) -> WebSocketResult<()> {
		self.inner.state_machine.text_start()?;
		// the text handler advances the state machine when it completes
		TextSendHandler::new(
			self.clone(),
			Bytes::copy_from_slice(text.as_bytes()),
			true,
			handler,
		)
		.write()
	}

	/// Sends one fragment of a text message. The message stays open
	/// until a fragment is sent with `last` set.
	pub fn send_partial_string(&self, fragment: &str, last: bool) -> WebSocketResult<()> {
		self.inner.state_machine.text_partial_start()?;
		self.send_partial_text(Bytes::copy_from_slice(fragment.as_bytes()), last)
	}

	// ------------------------------------------------------ control

	/// Sends a ping control frame. The payload is limited to 125 bytes.
	pub fn send_ping(&self, data: Bytes) -> WebSocketResult<()> {
		check_control_payload(&data)?;
		self.start_message_block(PartOpcode::Frame(Opcode::Ping), data, true)
	}

	/// Sends a pong control frame. The payload is limited to 125 bytes.
	pub fn send_pong(&self, data: Bytes) -> WebSocketResult<()> {
		check_control_payload(&data)?;
		self.start_message_block(PartOpcode::Frame(Opcode::Pong), data, true)
	}

	/// Sends a close control frame. Batched frames are flushed first,
	/// and the endpoint refuses further sends once the frame is on the
	/// wire.
	pub fn send_close(&self, data: Bytes) -> WebSocketResult<()> {
		check_control_payload(&data)?;
		self.start_message_block(PartOpcode::Frame(Opcode::Close), data, true)
	}

	// ------------------------------------------------------ streams

	/// Opens a byte sink that emits the bytes written to it as one
	/// fragmented binary message, one fragment per flush.
	pub fn send_stream(&self) -> WebSocketResult<SendStream> {
		self.inner.state_machine.stream_start()?;
		Ok(SendStream::new(self.clone()))
	}

	/// Opens a character sink that emits the text written to it as one
	/// fragmented text message, one fragment per flush.
	pub fn send_writer(&self) -> WebSocketResult<SendWriter> {
		self.inner.state_machine.write_start()?;
		Ok(SendWriter::new(self.clone()))
	}

	// ------------------------------------------------------ objects

	/// Sends an arbitrary object through the registered encoders,
	/// blocking until the resulting message is written.
	pub fn send_object(&self, object: &dyn Any) -> WebSocketResult<()> {
		self.send_object_by_future(object)?.get()
	}

	/// Sends an arbitrary object through the registered encoders,
	/// resolving the returned future when the message completes.
	pub fn send_object_by_future(&self, object: &dyn Any) -> WebSocketResult<Arc<SendFuture>> {
		let future = Arc::new(SendFuture::new());
		self.send_object_by_completion(object, future.clone())?;
		Ok(future)
	}

	/// Routes `object` through the first encoder registered for its
	/// type. Numeric, boolean and character objects are formatted and
	/// sent as text without consulting the encoder list. Encoder and
	/// I/O failures are delivered to `handler`; only misuse of the
	/// sender state is returned directly.
	pub fn send_object_by_completion(
		&self,
		object: &dyn Any,
		handler: Arc<dyn SendHandler>,
	) -> WebSocketResult<()> {
		if let Some(text) = encoder::scalar_to_string(object) {
			return self.send_string_by_completion(&text, handler);
		}

		let entry = match self.inner.encoders.iter().find(|entry| entry.accepts(object)) {
			Some(entry) => entry,
			None => {
				handler.on_result(Err(WebSocketError::Encode(
					"no encoder declared for the object type".into(),
				)));
				return Ok(());
			}
		};

		match entry.encoder() {
			AnyEncoder::Text(text_encoder) => match text_encoder.encode(object) {
				Ok(text) => self.send_string_by_completion(&text, handler)?,
				Err(err) => handler.on_result(Err(err)),
			},
			AnyEncoder::Binary(binary_encoder) => match binary_encoder.encode(object) {
				Ok(data) => self.send_bytes_by_completion(data, handler)?,
				Err(err) => handler.on_result(Err(err)),
			},
			AnyEncoder::TextStream(stream_encoder) => {
				let mut writer = self.send_writer()?;
				let encoded = stream_encoder.encode(object, &mut writer);
				// the writer is closed no matter how the encoder fared
				if let Err(err) = writer.close() {
					debug!("writer close after an object send failed: {}", err);
				}
				handler.on_result(encoded);
			}
			AnyEncoder::BinaryStream(stream_encoder) => {
				let mut stream = self.send_stream()?;
				let encoded = stream_encoder.encode(object, &mut stream);
				if let Err(err) = stream.close() {
					debug!("stream close after an object send failed: {}", err);
				}
				handler.on_result(encoded);
			}
		}
		Ok(())
	}

	// ----------------------------------------------------- batching

	/// When batching is allowed, frames may sit in the output buffer
	/// across sends until an explicit flush. Disabling batching flushes
	/// anything already retained.
	pub fn set_batching_allowed(&self, batching_allowed: bool) -> WebSocketResult<()> {
		let old = self
			.inner
			.batching_allowed
			.swap(batching_allowed, Ordering::SeqCst);
		if old && !batching_allowed {
			self.flush_batch()?;
		}
		Ok(())
	}

	pub fn batching_allowed(&self) -> bool {
		self.inner.batching_allowed.load(Ordering::SeqCst)
	}

	/// Commits any batched frames to the transport.
	pub fn flush_batch(&self) -> WebSocketResult<()> {
		self.start_message_block(PartOpcode::Flush, Bytes::new(), true)
	}

	// ----------------------------------------------------- timeouts

	/// The timeout in milliseconds applied to asynchronous sends, or
	/// `-1` when they may take arbitrarily long.
	pub fn send_timeout(&self) -> i64 {
		self.inner.send_timeout.load(Ordering::SeqCst)
	}

	pub fn set_send_timeout(&self, timeout: i64) {
		self.inner.send_timeout.store(timeout, Ordering::SeqCst);
	}

	// ---------------------------------------------------- lifecycle

	/// The session this endpoint belongs to.
	pub fn session(&self) -> &Arc<Session> {
		&self.inner.session
	}

	/// Destroys the registered encoders and closes the transport.
	pub fn close(&self) {
		for entry in &self.inner.encoders {
			entry.encoder().destroy();
		}
		self.inner.transport.do_close();
	}

	// ----------------------------------------------------- internal

	pub(crate) fn transport(&self) -> &dyn Transport {
		&*self.inner.transport
	}

	pub(crate) fn state_machine(&self) -> &StateMachine {
		&self.inner.state_machine
	}

	pub(crate) fn output_buffer(&self) -> &Mutex<BytesMut> {
		&self.inner.output_buffer
	}

	pub(crate) fn encode_buffer(&self) -> &Mutex<BytesMut> {
		&self.inner.encode_buffer
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Blocking submit used by every synchronous facade. The timeout is
	/// resolved before submission because a close message may tear down
	/// the session that owns the timeout value.
	pub(crate) fn start_message_block(
		&self,
		op: PartOpcode,
		payload: Bytes,
		last: bool,
	) -> WebSocketResult<()> {
		let timeout = self.inner.session.blocking_send_timeout();
		let future = Arc::new(SendFuture::new());
		self.start_message(op, payload, last, future.clone())?;
		if timeout < 0 {
			future.get()
		} else {
			future.get_timeout(Duration::from_millis(timeout as u64))
		}
	}

	/// Blocking text submit shared by the string facades and the
	/// writer adapter. The fragment is pushed through the text handler
	/// so oversized text keeps spilling into continuation frames.
	pub(crate) fn send_partial_text(&self, fragment: Bytes, last: bool) -> WebSocketResult<()> {
		let timeout = self.inner.session.blocking_send_timeout();
		let future = Arc::new(SendFuture::new());
		TextSendHandler::new(self.clone(), fragment, last, future.clone()).write()?;
		if timeout < 0 {
			future.get()
		} else {
			future.get_timeout(Duration::from_millis(timeout as u64))
		}
	}

	/// Accepts one part for emission: the part starts writing right
	/// away unless another part is on the wire, in which case it waits
	/// in the queue.
	pub(crate) fn start_message(
		&self,
		op: PartOpcode,
		payload: Bytes,
		last: bool,
		handler: Arc<dyn SendHandler>,
	) -> WebSocketResult<()> {
		self.inner.session.update_last_active();

		if op == PartOpcode::Frame(Opcode::Close) {
			// anything batched goes out ahead of the close frame
			if let Err(err) = self.set_batching_allowed(false) {
				warn!("failed to flush batched frames ahead of a close frame: {}", err);
			}
		}

		let part = MessagePart {
			op,
			payload,
			last,
			handler: Arc::new(EndMessageHandler {
				endpoint: self.clone(),
				handler,
			}),
		};

		let part = {
			let mut parts = self.inner.parts.lock();
			if parts.in_progress {
				// A control message sent while a data message is on the
				// wire waits here. The state machine keeps the queue to
				// at most one data part; any number of control parts may
				// sit around it.
				parts.queue.push_back(part);
				return Ok(());
			}
			parts.in_progress = true;
			part
		};
		// written outside the lock so a transport that completes inline
		// can re-enter end_message
		self.write_message_part(part)
	}

	/// Runs when a part's write completes: commits the staged
	/// fragmentation flags, starts the next queued part and only then
	/// notifies the caller of the finished part.
	pub(crate) fn end_message(&self, handler: &Arc<dyn SendHandler>, result: SendResult) {
		let next = {
			let mut parts = self.inner.parts.lock();
			parts.fragmented = parts.next_fragmented;
			parts.text = parts.next_text;
			match parts.queue.pop_front() {
				Some(part) => Some(part),
				None => {
					parts.in_progress = false;
					None
				}
			}
		};

		self.inner.session.update_last_active();

		if let Some(part) = next {
			if self.is_closed() {
				// The session closed under a queued part, so there is no
				// point writing it. Its completion still has to fire.
				part.handler
					.on_result(Err(WebSocketError::IllegalState("endpoint is closed")));
			} else {
				let on_error = part.handler.clone();
				if let Err(err) = self.write_message_part(part) {
					on_error.on_result(Err(err));
				}
			}
		}

		handler.on_result(result);
	}

	/// Frames one part and hands it to the transport. Runs only for the
	/// single in-progress part, which is what makes the shared header
	/// and output buffers safe to reuse.
	fn write_message_part(&self, part: MessagePart) -> WebSocketResult<()> {
		if self.is_closed() {
			return Err(WebSocketError::IllegalState("endpoint is closed"));
		}

		let opcode = match part.op {
			PartOpcode::Flush => {
				{
					let mut parts = self.inner.parts.lock();
					parts.next_fragmented = parts.fragmented;
					parts.next_text = parts.text;
				}
				let batched = self.inner.output_buffer.lock().split().freeze();
				self.inner.transport.do_write(part.handler, vec![batched]);
				return Ok(());
			}
			PartOpcode::Frame(opcode) => opcode,
		};

		let first = {
			let mut parts = self.inner.parts.lock();
			if opcode.is_control() {
				// control frames slot between the fragments of a data
				// message, so they leave the fragmentation flags alone
				parts.next_fragmented = parts.fragmented;
				parts.next_text = parts.text;
				if opcode == Opcode::Close {
					self.inner.closed.store(true, Ordering::SeqCst);
				}
				true
			} else {
				let is_text = opcode == Opcode::Text;
				if parts.fragmented {
					if parts.text != is_text {
						return Err(WebSocketError::IllegalState(
							"the type of a fragmented message cannot change",
						));
					}
					parts.next_text = parts.text;
					parts.next_fragmented = !part.last;
					false
				} else {
					// wasn't fragmented, might be now
					if part.last {
						parts.next_fragmented = false;
					} else {
						parts.next_fragmented = true;
						parts.next_text = is_text;
					}
					true
				}
			}
		};

		let masked = self.inner.transport.is_masked();
		let mask = if masked {
			Some(self.inner.transport.generate_mask())
		} else {
			None
		};

		let header = {
			let mut buffer = self.inner.header_buffer.lock();
			let mut flags = DataFrameFlags::empty();
			if part.last {
				flags.insert(DataFrameFlags::FIN);
			}
			// every fragment after the first is a continuation
			let wire_opcode = if first { opcode as u8 } else { 0 };
			let mut writer = (&mut *buffer).writer();
			header::write_header(
				&mut writer,
				DataFrameHeader {
					flags,
					opcode: wire_opcode,
					mask,
					len: part.payload.len() as u64,
				},
			)?;
			buffer.split().freeze()
		};

		if self.batching_allowed() || masked {
			// masking needs a mutable copy and batching needs the bytes
			// to survive across sends, so both go through the pump
			OutputBufferHandler::new(
				self.clone(),
				part.handler,
				header,
				part.payload,
				mask,
				!self.batching_allowed(),
			)
			.write();
		} else {
			self.inner
				.transport
				.do_write(part.handler, vec![header, part.payload]);
		}
		Ok(())
	}
}

/// Wraps the caller's handler so the endpoint is notified when the part
/// completes and can start the next queued part.
struct EndMessageHandler {
	endpoint: RemoteEndpoint,
	handler: Arc<dyn SendHandler>,
}

impl SendHandler for EndMessageHandler {
	fn on_result(&self, result: SendResult) {
		self.endpoint.end_message(&self.handler, result);
	}
}

/// Advances the state machine for single frame binary sends whose
/// facade cannot otherwise observe completion.
struct StateUpdateHandler {
	endpoint: RemoteEndpoint,
	handler: Arc<dyn SendHandler>,
}

impl SendHandler for StateUpdateHandler {
	fn on_result(&self, result: SendResult) {
		if result.is_ok() {
			if let Err(err) = self.endpoint.inner.state_machine.complete(true) {
				self.handler.on_result(Err(err));
				return;
			}
		}
		self.handler.on_result(result);
	}
}

fn check_control_payload(data: &Bytes) -> WebSocketResult<()> {
	if data.len() > 125 {
		return Err(WebSocketError::InvalidArgument(
			"control frame payload is limited to 125 bytes",
		));
	}
	Ok(())
}
