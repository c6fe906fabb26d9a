use super::{join_error_panic_message, panic_payload_message};

#[tokio::test]
async fn extracts_static_str_payload() {
	let handle = tokio::spawn(async { panic!("layout-str") });
	let err = handle.await.unwrap_err();
	let msg = join_error_panic_message(err).expect("should be a panic");
	assert!(msg.contains("layout-str"), "expected 'layout-str', got: {msg}");
}

#[tokio::test]
async fn extracts_formatted_payload() {
	let handle = tokio::spawn(async { panic!("tier {} failed", 3) });
	let err = handle.await.unwrap_err();
	let msg = join_error_panic_message(err).expect("should be a panic");
	assert_eq!(msg, "tier 3 failed");
}

#[tokio::test]
async fn aborted_join_is_not_a_panic() {
	let handle = tokio::spawn(async {
		tokio::time::sleep(std::time::Duration::from_secs(60)).await;
	});
	handle.abort();
	let err = handle.await.unwrap_err();
	assert!(join_error_panic_message(err).is_none());
}

#[test]
fn opaque_payloads_are_labelled() {
	let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
	assert_eq!(panic_payload_message(payload.as_ref()), "<non-string panic payload>");
}
