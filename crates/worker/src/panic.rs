use std::any::Any;

use tokio::task::JoinError;

/// Renders a panic payload as text.
///
/// `panic!` produces either a `&'static str` or a `String` payload; anything
/// else is reported as opaque.
pub fn panic_payload_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_owned()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"<non-string panic payload>".to_owned()
	}
}

/// Extracts the panic message from a failed join, or `None` when the task was cancelled.
pub fn join_error_panic_message(err: JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	let payload = err.into_panic();
	Some(panic_payload_message(payload.as_ref()))
}
