//! The result type used within the send path.

use std::error::Error;
use std::fmt;
use std::io;

/// The type used for fallible send path operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Represents an error raised by the send path.
#[derive(Debug)]
pub enum WebSocketError {
	/// The requested send is not legal in the sender's current state
	IllegalState(&'static str),
	/// A send argument failed validation
	InvalidArgument(&'static str),
	/// A received or replayed frame violated the framing rules
	Protocol(&'static str),
	/// A user encoder failed, or no encoder matched the object
	Encode(Box<dyn Error + Send + Sync>),
	/// An input/output error reported by the transport
	Io(io::Error),
	/// A blocking send did not complete within the configured timeout
	Timeout,
	/// An encoder could not be initialised
	Deployment(String),
}

impl fmt::Display for WebSocketError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			WebSocketError::IllegalState(msg) => write!(fmt, "illegal sender state: {}", msg),
			WebSocketError::InvalidArgument(msg) => write!(fmt, "invalid argument: {}", msg),
			WebSocketError::Protocol(msg) => write!(fmt, "WebSocket protocol error: {}", msg),
			WebSocketError::Encode(err) => write!(fmt, "encode failure: {}", err),
			WebSocketError::Io(err) => write!(fmt, "I/O failure: {}", err),
			WebSocketError::Timeout => fmt.write_str("blocking send timed out"),
			WebSocketError::Deployment(msg) => write!(fmt, "encoder deployment failure: {}", msg),
		}
	}
}

impl Error for WebSocketError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			WebSocketError::Io(ref err) => Some(err),
			WebSocketError::Encode(ref err) => Some(&**err),
			_ => None,
		}
	}
}

impl From<io::Error> for WebSocketError {
	fn from(err: io::Error) -> WebSocketError {
		WebSocketError::Io(err)
	}
}
