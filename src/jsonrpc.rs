//! JSON-RPC framing
//!
//! Request shapes accepted by the proxy and the synthetic rejection envelope.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The only method the firewall inspects
pub const SEND_RAW_TRANSACTION: &str = "eth_sendRawTransaction";

/// Error code of the synthetic rejection envelope
pub const REJECTION_CODE: i64 = -32000;

/// Fixed prefix of every rejection message
pub const REJECTION_MESSAGE: &str = "Error: potential phishing attempt detected - reverting transaction.";

/// A single JSON-RPC call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Kept as sent; nodes tolerate non-string versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// First positional parameter as a string
    pub fn first_param_str(&self) -> Option<&str> {
        match self.params.as_ref()? {
            Value::Array(items) => items.first()?.as_str(),
            _ => None,
        }
    }

    pub fn is_send_raw_transaction(&self) -> bool {
        self.method == SEND_RAW_TRANSACTION
    }
}

/// Body of a proxied request: one call or a batch
#[derive(Debug, Clone, PartialEq)]
pub enum RpcBody {
    Single(Value),
    Batch(Vec<Value>),
}

impl RpcBody {
    /// Parse a request body
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice(body)? {
            Value::Array(items) => Ok(RpcBody::Batch(items)),
            other => Ok(RpcBody::Single(other)),
        }
    }

    /// Elements in array order
    pub fn elements(&self) -> &[Value] {
        match self {
            RpcBody::Single(value) => std::slice::from_ref(value),
            RpcBody::Batch(items) => items,
        }
    }
}

/// Interpret one element as a JSON-RPC call, if it is shaped like one
pub fn as_request(element: &Value) -> Option<JsonRpcRequest> {
    serde_json::from_value(element.clone()).ok()
}

/// `id` of an element, when it carries one
pub fn element_id(element: &Value) -> Option<Value> {
    element.get("id").cloned()
}

/// `method` of an element, when it carries one
pub fn element_method(element: &Value) -> Option<String> {
    element
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Build the synthetic rejection envelope
///
/// # Arguments
/// * `id` - Id of the rejected call, `null` when unknown
/// * `reason` - Validator message appended to the fixed prefix; omitted for internal errors
pub fn rejection_envelope(id: Option<&Value>, reason: Option<&str>) -> Value {
    let message = match reason {
        Some(reason) => format!("{REJECTION_MESSAGE} {reason}"),
        None => REJECTION_MESSAGE.to_string(),
    };

    json!({
        "jsonrpc": "2.0",
        "id": id.cloned().unwrap_or(Value::Null),
        "error": {
            "code": REJECTION_CODE,
            "message": message,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_batch() {
        let single = RpcBody::parse(br#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#).unwrap();
        assert_eq!(single.elements().len(), 1);

        let batch = RpcBody::parse(
            br#"[{"id":1,"method":"eth_chainId"},{"id":2,"method":"eth_blockNumber"}]"#,
        )
        .unwrap();
        assert!(matches!(batch, RpcBody::Batch(_)));
        assert_eq!(batch.elements().len(), 2);
        assert_eq!(element_method(&batch.elements()[1]).as_deref(), Some("eth_blockNumber"));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(RpcBody::parse(b"{ nope").is_err());
    }

    #[test]
    fn test_first_param_str() {
        let req = as_request(&json!({"id": 7, "method": SEND_RAW_TRANSACTION, "params": ["0xf86b"]})).unwrap();
        assert!(req.is_send_raw_transaction());
        assert_eq!(req.first_param_str(), Some("0xf86b"));
        assert_eq!(req.id, Some(json!(7)));

        let req = as_request(&json!({"method": SEND_RAW_TRANSACTION, "params": [42]})).unwrap();
        assert_eq!(req.first_param_str(), None);

        let req = as_request(&json!({"method": SEND_RAW_TRANSACTION})).unwrap();
        assert_eq!(req.first_param_str(), None);
    }

    #[test]
    fn test_non_string_version_still_parses() {
        let element = json!({"jsonrpc": 2.0, "id": 1, "method": SEND_RAW_TRANSACTION, "params": ["0xf86b"]});
        let req = as_request(&element).unwrap();
        assert!(req.is_send_raw_transaction());
        assert_eq!(req.jsonrpc, Some(json!(2.0)));
    }

    #[test]
    fn test_non_request_element() {
        assert!(as_request(&json!(42)).is_none());
        assert!(as_request(&json!({"id": 1})).is_none());
    }

    #[test]
    fn test_rejection_envelope_shape() {
        let envelope = rejection_envelope(Some(&json!(3)), Some("Transaction denied"));
        assert_eq!(envelope["id"], json!(3));
        assert_eq!(envelope["jsonrpc"], "2.0");
        assert_eq!(envelope["error"]["code"], json!(-32000));
        assert_eq!(
            envelope["error"]["message"],
            "Error: potential phishing attempt detected - reverting transaction. Transaction denied"
        );

        let envelope = rejection_envelope(None, None);
        assert_eq!(envelope["id"], Value::Null);
        assert_eq!(envelope["error"]["message"], REJECTION_MESSAGE);
    }
}
