//! The send half of a WebSocket (RFC6455) remote endpoint.
//!
//! This crate turns application level send calls (binary, text, ping,
//! pong, close, partial fragments, streamed bytes or characters, and
//! typed objects routed through user encoders) into a correctly framed,
//! optionally masked byte stream written to an asynchronous transport.
//!
//! The moving parts are deliberately small. A state machine rejects
//! illegal interleavings of the public surface, a message part queue
//! keeps fragments ordered while letting control frames through, and a
//! chain of completion handlers pushes arbitrarily large payloads
//! through a fixed size output buffer without ever blocking on the
//! transport.
//!
//! The transport itself is not part of this crate. Anything that can
//! write byte buffers and signal completion can sit underneath, see
//! [`Transport`](transport::Transport).

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod encoder;
pub mod frame;
pub mod handler;
pub mod result;
pub mod sender;
pub mod session;
pub mod transport;

pub use crate::handler::{SendFuture, SendHandler, SendResult};
pub use crate::result::{WebSocketError, WebSocketResult};
pub use crate::sender::{RemoteEndpoint, SendStream, SendWriter};
pub use crate::session::Session;
pub use crate::transport::Transport;
