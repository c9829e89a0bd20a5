//! The strictly synchronous gate on every public send entry point.

use crate::result::{WebSocketError, WebSocketResult};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
	Open,
	StreamWriting,
	WriterWriting,
	BinaryPartialWriting,
	BinaryPartialReady,
	BinaryFullWriting,
	TextPartialWriting,
	TextPartialReady,
	TextFullWriting,
}

/// Tracks which kind of message is on the wire and rejects illegal
/// interleavings of the public surface.
///
/// The machine is advisory across calls but authoritative within a
/// call: it prevents mixing partial binary with partial text, starting
/// a new message before a fragmented one finishes, and so on. The
/// `Ready` states mean a fragmented partial message is in progress and
/// waiting for its next fragment.
pub(crate) struct StateMachine {
	state: Mutex<State>,
}

impl StateMachine {
	pub fn new() -> StateMachine {
		StateMachine {
			state: Mutex::new(State::Open),
		}
	}

	pub fn stream_start(&self) -> WebSocketResult<()> {
		self.transition(&[State::Open], State::StreamWriting)
	}

	pub fn write_start(&self) -> WebSocketResult<()> {
		self.transition(&[State::Open], State::WriterWriting)
	}

	pub fn binary_partial_start(&self) -> WebSocketResult<()> {
		self.transition(
			&[State::Open, State::BinaryPartialReady],
			State::BinaryPartialWriting,
		)
	}

	pub fn binary_start(&self) -> WebSocketResult<()> {
		self.transition(&[State::Open], State::BinaryFullWriting)
	}

	pub fn text_partial_start(&self) -> WebSocketResult<()> {
		self.transition(
			&[State::Open, State::TextPartialReady],
			State::TextPartialWriting,
		)
	}

	pub fn text_start(&self) -> WebSocketResult<()> {
		self.transition(&[State::Open], State::TextFullWriting)
	}

	/// Records that the message part whose send is underway finished.
	/// With `last` set the sender returns to `Open`; otherwise a partial
	/// write parks in its `Ready` state until the next fragment.
	pub fn complete(&self, last: bool) -> WebSocketResult<()> {
		let mut state = self.state.lock();
		if last {
			check_state(
				*state,
				&[
					State::TextPartialWriting,
					State::TextFullWriting,
					State::BinaryPartialWriting,
					State::BinaryFullWriting,
					State::StreamWriting,
					State::WriterWriting,
				],
			)?;
			*state = State::Open;
		} else {
			check_state(
				*state,
				&[
					State::TextPartialWriting,
					State::BinaryPartialWriting,
					State::StreamWriting,
					State::WriterWriting,
				],
			)?;
			match *state {
				State::TextPartialWriting => *state = State::TextPartialReady,
				State::BinaryPartialWriting => *state = State::BinaryPartialReady,
				// stream and writer sends stay in their writing state
				// until the final fragment
				_ => (),
			}
		}
		Ok(())
	}

	fn transition(&self, required: &[State], to: State) -> WebSocketResult<()> {
		let mut state = self.state.lock();
		check_state(*state, required)?;
		*state = to;
		Ok(())
	}
}

fn check_state(current: State, required: &[State]) -> WebSocketResult<()> {
	if required.contains(&current) {
		return Ok(());
	}
	Err(WebSocketError::IllegalState(
		"the sender state does not permit this message",
	))
}
