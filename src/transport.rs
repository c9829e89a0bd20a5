//! The asynchronous byte transport underneath the remote endpoint.

use crate::frame::mask;
use crate::handler::SendHandler;
use bytes::Bytes;
use std::sync::Arc;

/// Write capability of the underlying connection.
///
/// This is an abstraction around the byte stream behind the endpoint so
/// the send path can speak websockets over tcp, tls, unix sockets, etc.
/// The endpoint never blocks on it; progress resumes through the
/// completion handler.
pub trait Transport: Send + Sync {
	/// Writes every buffer fully to the connection, then invokes the
	/// handler exactly once. The handler may fire inline on the calling
	/// thread or later on any thread the transport chooses. Whether the
	/// buffers go out in a single gathering write is up to the
	/// implementation.
	fn do_write(&self, handler: Arc<dyn SendHandler>, buffers: Vec<Bytes>);

	/// Whether outgoing frames must carry a masking key. Clients mask,
	/// servers do not. Consulted once per frame.
	fn is_masked(&self) -> bool;

	/// Produces the masking key for one frame.
	fn generate_mask(&self) -> [u8; 4] {
		mask::gen_mask()
	}

	/// Tears down the connection. Called once, after the endpoint has
	/// destroyed its encoders.
	fn do_close(&self);
}
