//! User supplied encoders that turn application objects into messages.

use crate::result::WebSocketResult;
use crate::sender::{SendStream, SendWriter};
use bytes::Bytes;
use std::any::{Any, TypeId};

/// Lifecycle shared by every encoder category.
pub trait Encoder: Send + Sync {
	/// Called once while the endpoint is being set up. A failure aborts
	/// endpoint construction.
	fn init(&self) -> WebSocketResult<()> {
		Ok(())
	}

	/// Called once when the endpoint closes.
	fn destroy(&self) {}
}

/// Encodes an object to a single text message.
pub trait TextEncoder: Encoder {
	fn encode(&self, object: &dyn Any) -> WebSocketResult<String>;
}

/// Encodes an object by writing characters to the endpoint's writer.
pub trait TextStreamEncoder: Encoder {
	fn encode(&self, object: &dyn Any, writer: &mut SendWriter) -> WebSocketResult<()>;
}

/// Encodes an object to a single binary message.
pub trait BinaryEncoder: Encoder {
	fn encode(&self, object: &dyn Any) -> WebSocketResult<Bytes>;
}

/// Encodes an object by writing bytes to the endpoint's stream.
pub trait BinaryStreamEncoder: Encoder {
	fn encode(&self, object: &dyn Any, stream: &mut SendStream) -> WebSocketResult<()>;
}

/// One registered encoder, tagged with the category it dispatches
/// under.
pub enum AnyEncoder {
	Text(Box<dyn TextEncoder>),
	TextStream(Box<dyn TextStreamEncoder>),
	Binary(Box<dyn BinaryEncoder>),
	BinaryStream(Box<dyn BinaryStreamEncoder>),
}

impl AnyEncoder {
	pub(crate) fn init(&self) -> WebSocketResult<()> {
		match self {
			AnyEncoder::Text(encoder) => encoder.init(),
			AnyEncoder::TextStream(encoder) => encoder.init(),
			AnyEncoder::Binary(encoder) => encoder.init(),
			AnyEncoder::BinaryStream(encoder) => encoder.init(),
		}
	}

	pub(crate) fn destroy(&self) {
		match self {
			AnyEncoder::Text(encoder) => encoder.destroy(),
			AnyEncoder::TextStream(encoder) => encoder.destroy(),
			AnyEncoder::Binary(encoder) => encoder.destroy(),
			AnyEncoder::BinaryStream(encoder) => encoder.destroy(),
		}
	}
}

/// Associates an encoder with the object type it accepts.
///
/// Object sends walk the entry list in registration order and the first
/// entry declared for the object's type wins, so an entry registered
/// earlier shadows a later one for the same type.
pub struct EncoderEntry {
	type_id: TypeId,
	type_name: &'static str,
	encoder: AnyEncoder,
}

impl EncoderEntry {
	/// Declares `encoder` as handling objects of type `T`.
	pub fn new<T: 'static>(encoder: AnyEncoder) -> EncoderEntry {
		EncoderEntry {
			type_id: TypeId::of::<T>(),
			type_name: std::any::type_name::<T>(),
			encoder,
		}
	}

	pub(crate) fn accepts(&self, object: &dyn Any) -> bool {
		self.type_id == object.type_id()
	}

	pub(crate) fn type_name(&self) -> &'static str {
		self.type_name
	}

	pub(crate) fn encoder(&self) -> &AnyEncoder {
		&self.encoder
	}
}

macro_rules! try_scalar {
	($object:expr, $($ty:ty),+ $(,)?) => {
		$(
			if let Some(value) = $object.downcast_ref::<$ty>() {
				return Some(value.to_string());
			}
		)+
	};
}

/// Formats numeric, boolean and character objects, which are sent as
/// text without consulting the encoder list.
pub(crate) fn scalar_to_string(object: &dyn Any) -> Option<String> {
	try_scalar!(
		object, bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32,
		f64,
	);
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::handler::SendHandler;
	use crate::result::WebSocketError;
	use crate::sender::tests::{parse_frames, server_endpoint, InlineTransport, SilentTransport};
	use crate::sender::RemoteEndpoint;
	use crate::session::Session;
	use crate::transport::Transport;
	use parking_lot::Mutex;
	use std::io::Write;
	use std::sync::Arc;

	#[test]
	fn scalars_format_as_text() {
		assert_eq!(scalar_to_string(&5i32), Some("5".to_string()));
		assert_eq!(scalar_to_string(&true), Some("true".to_string()));
		assert_eq!(scalar_to_string(&'x'), Some("x".to_string()));
		assert_eq!(scalar_to_string(&2.5f64), Some("2.5".to_string()));
	}

	#[test]
	fn non_scalars_are_not_formatted() {
		assert_eq!(scalar_to_string(&"text"), None);
		assert_eq!(scalar_to_string(&vec![1u8]), None);
	}

	#[test]
	fn entry_accepts_only_its_declared_type() {
		struct Dummy;
		impl Encoder for Dummy {}
		impl TextEncoder for Dummy {
			fn encode(&self, _object: &dyn Any) -> WebSocketResult<String> {
				Ok(String::new())
			}
		}

		let entry = EncoderEntry::new::<String>(AnyEncoder::Text(Box::new(Dummy)));
		assert!(entry.accepts(&"owned".to_string()));
		assert!(!entry.accepts(&5i32));
	}

	struct Greeting {
		name: String,
	}

	struct GreetingEncoder;

	impl Encoder for GreetingEncoder {}

	impl TextEncoder for GreetingEncoder {
		fn encode(&self, object: &dyn Any) -> WebSocketResult<String> {
			let greeting = object
				.downcast_ref::<Greeting>()
				.ok_or_else(|| WebSocketError::Encode("not a greeting".into()))?;
			Ok(format!("hello {}", greeting.name))
		}
	}

	struct Blob {
		data: Vec<u8>,
	}

	struct BlobEncoder;

	impl Encoder for BlobEncoder {}

	impl BinaryEncoder for BlobEncoder {
		fn encode(&self, object: &dyn Any) -> WebSocketResult<Bytes> {
			let blob = object
				.downcast_ref::<Blob>()
				.ok_or_else(|| WebSocketError::Encode("not a blob".into()))?;
			Ok(Bytes::from(blob.data.clone()))
		}
	}

	struct StreamedBlobEncoder;

	impl Encoder for StreamedBlobEncoder {}

	impl BinaryStreamEncoder for StreamedBlobEncoder {
		fn encode(&self, object: &dyn Any, stream: &mut SendStream) -> WebSocketResult<()> {
			let blob = object
				.downcast_ref::<Blob>()
				.ok_or_else(|| WebSocketError::Encode("not a blob".into()))?;
			stream.write_all(&blob.data).map_err(WebSocketError::from)?;
			Ok(())
		}
	}

	struct StreamedGreetingEncoder;

	impl Encoder for StreamedGreetingEncoder {}

	impl TextStreamEncoder for StreamedGreetingEncoder {
		fn encode(&self, object: &dyn Any, writer: &mut SendWriter) -> WebSocketResult<()> {
			let greeting = object
				.downcast_ref::<Greeting>()
				.ok_or_else(|| WebSocketError::Encode("not a greeting".into()))?;
			writer.write_str("hello ")?;
			writer.write_str(&greeting.name)
		}
	}

	fn endpoint_with_encoders(
		encoders: Vec<EncoderEntry>,
	) -> (RemoteEndpoint, Arc<InlineTransport>) {
		let transport = InlineTransport::server();
		let endpoint = RemoteEndpoint::new(
			Box::new(transport.clone()),
			Arc::new(Session::new()),
			encoders,
		)
		.unwrap();
		(endpoint, transport)
	}

	#[test]
	fn object_send_routes_through_a_text_encoder() {
		let (endpoint, transport) = endpoint_with_encoders(vec![EncoderEntry::new::<Greeting>(
			AnyEncoder::Text(Box::new(GreetingEncoder)),
		)]);
		endpoint
			.send_object(&Greeting {
				name: "ada".to_string(),
			})
			.unwrap();

		let frames = parse_frames(&transport.written());
		assert_eq!(frames[0].0.opcode, 0x1);
		assert_eq!(frames[0].1, b"hello ada");
	}

	#[test]
	fn object_send_routes_through_a_binary_encoder() {
		let (endpoint, transport) = endpoint_with_encoders(vec![EncoderEntry::new::<Blob>(
			AnyEncoder::Binary(Box::new(BlobEncoder)),
		)]);
		endpoint
			.send_object(&Blob {
				data: vec![1, 2, 3],
			})
			.unwrap();

		let frames = parse_frames(&transport.written());
		assert_eq!(frames[0].0.opcode, 0x2);
		assert_eq!(frames[0].1, vec![1, 2, 3]);
	}

	#[test]
	fn object_send_routes_through_stream_encoders() {
		let (endpoint, transport) = endpoint_with_encoders(vec![
			EncoderEntry::new::<Blob>(AnyEncoder::BinaryStream(Box::new(StreamedBlobEncoder))),
			EncoderEntry::new::<Greeting>(AnyEncoder::TextStream(Box::new(
				StreamedGreetingEncoder,
			))),
		]);
		endpoint
			.send_object(&Blob {
				data: vec![9, 9, 9],
			})
			.unwrap();
		endpoint
			.send_object(&Greeting {
				name: "ada".to_string(),
			})
			.unwrap();

		let frames = parse_frames(&transport.written());
		let binary: Vec<u8> = frames
			.iter()
			.take_while(|(header, _)| header.opcode != 0x1)
			.flat_map(|(_, p)| p.clone())
			.collect();
		assert_eq!(binary, vec![9, 9, 9]);
		let text: Vec<u8> = frames
			.iter()
			.skip_while(|(header, _)| header.opcode != 0x1)
			.flat_map(|(_, p)| p.clone())
			.collect();
		assert_eq!(String::from_utf8(text).unwrap(), "hello ada");
	}

	#[test]
	fn first_registered_encoder_wins() {
		struct ShoutingEncoder;
		impl Encoder for ShoutingEncoder {}
		impl TextEncoder for ShoutingEncoder {
			fn encode(&self, object: &dyn Any) -> WebSocketResult<String> {
				let greeting = object
					.downcast_ref::<Greeting>()
					.ok_or_else(|| WebSocketError::Encode("not a greeting".into()))?;
				Ok(format!("HELLO {}", greeting.name.to_uppercase()))
			}
		}

		let (endpoint, transport) = endpoint_with_encoders(vec![
			EncoderEntry::new::<Greeting>(AnyEncoder::Text(Box::new(ShoutingEncoder))),
			EncoderEntry::new::<Greeting>(AnyEncoder::Text(Box::new(GreetingEncoder))),
		]);
		endpoint
			.send_object(&Greeting {
				name: "ada".to_string(),
			})
			.unwrap();

		let frames = parse_frames(&transport.written());
		assert_eq!(frames[0].1, b"HELLO ADA");
	}

	#[test]
	fn scalars_are_sent_as_text_without_an_encoder() {
		let (endpoint, transport) = server_endpoint();
		endpoint.send_object(&42i32).unwrap();
		endpoint.send_object(&true).unwrap();

		let frames = parse_frames(&transport.written());
		assert_eq!(frames[0].1, b"42");
		assert_eq!(frames[1].1, b"true");
	}

	#[test]
	fn unmatched_objects_fail_through_the_handler() {
		let (endpoint, transport) = server_endpoint();
		match endpoint.send_object(&Greeting {
			name: "ada".to_string(),
		}) {
			Err(WebSocketError::Encode(_)) => (),
			other => panic!("expected an encode failure, got {:?}", other),
		}
		assert!(transport.written().is_empty());
	}

	#[test]
	fn failing_encoder_reaches_the_handler_not_the_caller() {
		struct FailingEncoder;
		impl Encoder for FailingEncoder {}
		impl TextEncoder for FailingEncoder {
			fn encode(&self, _object: &dyn Any) -> WebSocketResult<String> {
				Err(WebSocketError::Encode("broken".into()))
			}
		}

		let (endpoint, _transport) = endpoint_with_encoders(vec![EncoderEntry::new::<Greeting>(
			AnyEncoder::Text(Box::new(FailingEncoder)),
		)]);
		let future = endpoint
			.send_object_by_future(&Greeting {
				name: "ada".to_string(),
			})
			.unwrap();
		match future.get() {
			Err(WebSocketError::Encode(_)) => (),
			other => panic!("expected an encode failure, got {:?}", other),
		}
	}

	#[test]
	fn close_destroys_encoders_before_the_transport() {
		struct TrackedEncoder {
			events: Arc<Mutex<Vec<&'static str>>>,
		}
		impl Encoder for TrackedEncoder {
			fn destroy(&self) {
				self.events.lock().push("destroy");
			}
		}
		impl TextEncoder for TrackedEncoder {
			fn encode(&self, _object: &dyn Any) -> WebSocketResult<String> {
				Ok(String::new())
			}
		}

		struct TrackedTransport {
			events: Arc<Mutex<Vec<&'static str>>>,
		}
		impl Transport for TrackedTransport {
			fn do_write(&self, handler: Arc<dyn SendHandler>, _buffers: Vec<Bytes>) {
				handler.on_result(Ok(()));
			}
			fn is_masked(&self) -> bool {
				false
			}
			fn do_close(&self) {
				self.events.lock().push("close");
			}
		}

		let events = Arc::new(Mutex::new(Vec::new()));
		let endpoint = RemoteEndpoint::new(
			Box::new(TrackedTransport {
				events: events.clone(),
			}),
			Arc::new(Session::new()),
			vec![EncoderEntry::new::<Greeting>(AnyEncoder::Text(Box::new(
				TrackedEncoder {
					events: events.clone(),
				},
			)))],
		)
		.unwrap();

		endpoint.close();
		assert_eq!(*events.lock(), vec!["destroy", "close"]);
	}

	#[test]
	fn failing_encoder_init_aborts_construction() {
		struct BrokenEncoder;
		impl Encoder for BrokenEncoder {
			fn init(&self) -> WebSocketResult<()> {
				Err(WebSocketError::Encode("cannot start".into()))
			}
		}
		impl TextEncoder for BrokenEncoder {
			fn encode(&self, _object: &dyn Any) -> WebSocketResult<String> {
				Ok(String::new())
			}
		}

		let result = RemoteEndpoint::new(
			Box::new(SilentTransport),
			Arc::new(Session::new()),
			vec![EncoderEntry::new::<Greeting>(AnyEncoder::Text(Box::new(
				BrokenEncoder,
			)))],
		);
		match result {
			Err(WebSocketError::Deployment(_)) => (),
			other => panic!(
				"expected a deployment failure, got {:?}",
				other.map(|_| "endpoint")
			),
		}
	}
}
