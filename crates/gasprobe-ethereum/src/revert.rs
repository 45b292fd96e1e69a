//! Revert reason extraction from node error objects.

use alloy_primitives::{hex, U256};
use serde_json::Value;

/// Selector of the solidity `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

const MESSAGE_PREFIXES: [&str; 2] = ["execution reverted: ", "reverted with reason string '"];

/// Revert reason carried by a fault, looking at the ABI payload in `data` first and at
/// the human readable message second.
pub fn reason_from_fault(message: &str, data: Option<&Value>) -> Option<String> {
    data.and_then(payload_of).and_then(|payload| decode_error_string(&payload)).or_else(|| reason_from_message(message))
}

/// Decodes an `Error(string)` payload, `None` for any other payload.
pub fn decode_error_string(payload: &[u8]) -> Option<String> {
    let body = payload.strip_prefix(ERROR_STRING_SELECTOR.as_slice())?;

    let offset = word_as_usize(body.get(0..32)?)?;
    let length_end = offset.checked_add(32)?;
    let length = word_as_usize(body.get(offset..length_end)?)?;
    let bytes = body.get(length_end..length_end.checked_add(length)?)?;

    String::from_utf8(bytes.to_vec()).ok()
}

fn word_as_usize(word: &[u8]) -> Option<usize> {
    let value = U256::try_from_be_slice(word)?;
    usize::try_from(u64::try_from(value).ok()?).ok()
}

fn payload_of(data: &Value) -> Option<Vec<u8>> {
    match data {
        Value::String(s) => hex::decode(s).ok(),
        // Some nodes nest the payload: { "data": "0x..." }
        Value::Object(o) => o.get("data").and_then(payload_of),
        _ => None,
    }
}

fn reason_from_message(message: &str) -> Option<String> {
    MESSAGE_PREFIXES.iter().find_map(|prefix| {
        message
            .find(prefix)
            .map(|i| message[i + prefix.len()..].trim_end_matches('\'').to_string())
            .filter(|reason| !reason.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // Error("Not enough Ether provided.")
    const PAYLOAD: &str = "0x08c379a0\
        0000000000000000000000000000000000000000000000000000000000000020\
        000000000000000000000000000000000000000000000000000000000000001a\
        4e6f7420656e6f7567682045746865722070726f76696465642e000000000000";

    mod decode_error_string {
        use super::*;

        #[test]
        fn should_decode_abi_payload() {
            let payload = hex::decode(PAYLOAD).unwrap();

            assert_eq!(decode_error_string(&payload).as_deref(), Some("Not enough Ether provided."));
        }

        #[test]
        fn should_ignore_other_selectors() {
            // Panic(uint256)
            let payload = hex::decode("0x4e487b710000000000000000000000000000000000000000000000000000000000000001").unwrap();

            assert!(decode_error_string(&payload).is_none());
        }

        #[test]
        fn should_reject_truncated_payload() {
            let payload = hex::decode(&PAYLOAD[..82]).unwrap();

            assert!(decode_error_string(&payload).is_none());
        }
    }

    mod reason_from_fault {
        use super::*;

        #[test]
        fn should_prefer_data_over_message() {
            let reason = reason_from_fault("execution reverted: something", Some(&json!(PAYLOAD)));

            assert_eq!(reason.as_deref(), Some("Not enough Ether provided."));
        }

        #[test]
        fn should_read_nested_data() {
            let reason = reason_from_fault("execution reverted", Some(&json!({ "data": PAYLOAD })));

            assert_eq!(reason.as_deref(), Some("Not enough Ether provided."));
        }

        #[test]
        fn should_fall_back_to_message() {
            let reason = reason_from_fault("VM Exception: reverted with reason string 'not owner'", Some(&json!("0x")));

            assert_eq!(reason.as_deref(), Some("not owner"));
        }

        #[test]
        fn should_return_none_without_reason() {
            assert!(reason_from_fault("execution reverted", None).is_none());
        }
    }
}
