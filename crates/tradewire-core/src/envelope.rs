//! Response envelopes and normalized payloads.
//!
//! The backend wraps some payloads as `{data, meta}` (v2) or `{data}` (v1) and
//! returns others bare. [`normalize`] turns a successful response body into a
//! [`Payload`], unwrapping either envelope. Content types other than JSON or
//! text come back as opaque bytes.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClassifiedError;

/// Wire wrapper the backend may place around a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{data}` and nothing else.
    V1 { data: Value },
    /// `{data, meta, ...}`.
    V2 { data: Value, meta: Value },
    /// Never-wrapped endpoints.
    Raw(Value),
}

impl Envelope {
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::Raw(value);
        };

        if object.contains_key("data") && object.contains_key("meta") {
            let data = object.remove("data").unwrap_or(Value::Null);
            let meta = object.remove("meta").unwrap_or(Value::Null);
            return Self::V2 { data, meta };
        }

        if object.len() == 1 {
            if let Some(data) = object.remove("data") {
                return Self::V1 { data };
            }
        }

        Self::Raw(Value::Object(object))
    }

    pub fn into_data(self) -> Value {
        match self {
            Self::V1 { data } | Self::V2 { data, .. } => data,
            Self::Raw(value) => value,
        }
    }
}

/// Opaque body for content types the core does not interpret (downloads, exports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBody {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Normalized success payload handed back to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    Text(String),
    Binary(BinaryBody),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Deserialize into a caller type. `Empty` decodes as JSON `null`.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ClassifiedError> {
        let value = match self {
            Self::Empty => Value::Null,
            Self::Json(value) => value,
            Self::Text(text) => Value::String(text),
            Self::Binary(body) => {
                return Err(ClassifiedError::decode(format!(
                    "expected structured payload, got {} bytes of {}",
                    body.bytes.len(),
                    body.content_type.as_deref().unwrap_or("unknown content")
                )))
            }
        };

        serde_json::from_value(value)
            .map_err(|error| ClassifiedError::decode(format!("unexpected payload shape: {error}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentClass {
    Structured,
    Text,
    Opaque,
    Unlabelled,
}

fn content_class(content_type: Option<&str>) -> ContentClass {
    let Some(content_type) = content_type else {
        return ContentClass::Unlabelled;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.is_empty() {
        ContentClass::Unlabelled
    } else if essence == "application/json" || essence.ends_with("+json") {
        ContentClass::Structured
    } else if essence.starts_with("text/") {
        ContentClass::Text
    } else {
        ContentClass::Opaque
    }
}

/// Turns a successful response body into a [`Payload`], unwrapping envelopes.
pub fn normalize(body: &[u8], content_type: Option<&str>) -> Result<Payload, ClassifiedError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::Empty);
    }

    match content_class(content_type) {
        ContentClass::Structured => {
            let value: Value = serde_json::from_slice(body).map_err(|error| {
                ClassifiedError::decode(format!("malformed JSON response: {error}"))
            })?;
            Ok(Payload::Json(Envelope::classify(value).into_data()))
        }
        ContentClass::Text => Ok(Payload::Text(String::from_utf8_lossy(body).into_owned())),
        ContentClass::Opaque => Ok(Payload::Binary(BinaryBody {
            content_type: content_type.map(str::to_owned),
            bytes: body.to_vec(),
        })),
        ContentClass::Unlabelled => {
            if let Ok(value) = serde_json::from_slice::<Value>(body) {
                return Ok(Payload::Json(Envelope::classify(value).into_data()));
            }
            match std::str::from_utf8(body) {
                Ok(text) => Ok(Payload::Text(text.to_owned())),
                Err(_) => Ok(Payload::Binary(BinaryBody {
                    content_type: None,
                    bytes: body.to_vec(),
                })),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    const JSON: Option<&str> = Some("application/json; charset=utf-8");

    #[test]
    fn v2_envelope_is_unwrapped() {
        let payload = normalize(br#"{"data":{"x":1},"meta":{"page":1}}"#, JSON).expect("payload");
        assert_eq!(payload, Payload::Json(json!({"x": 1})));
    }

    #[test]
    fn v1_envelope_is_unwrapped() {
        let payload = normalize(br#"{"data":{"x":1}}"#, JSON).expect("payload");
        assert_eq!(payload, Payload::Json(json!({"x": 1})));
    }

    #[test]
    fn raw_payload_is_untouched() {
        let payload = normalize(br#"{"x":1}"#, JSON).expect("payload");
        assert_eq!(payload, Payload::Json(json!({"x": 1})));

        // `data` with unrelated siblings and no `meta` is a raw payload.
        let payload = normalize(br#"{"data":[1,2],"success":true}"#, JSON).expect("payload");
        assert_eq!(payload, Payload::Json(json!({"data": [1, 2], "success": true})));

        let payload = normalize(b"[1,2,3]", JSON).expect("payload");
        assert_eq!(payload, Payload::Json(json!([1, 2, 3])));
    }

    #[test]
    fn classify_distinguishes_versions() {
        assert!(matches!(
            Envelope::classify(json!({"data": 1, "meta": {}, "errors": []})),
            Envelope::V2 { .. }
        ));
        assert!(matches!(Envelope::classify(json!({"data": null})), Envelope::V1 { .. }));
        assert!(matches!(Envelope::classify(json!("plain")), Envelope::Raw(_)));
    }

    #[test]
    fn text_and_binary_bodies() {
        let text = normalize(b"pong", Some("text/plain")).expect("payload");
        assert_eq!(text.as_text(), Some("pong"));

        let binary = normalize(b"\x00\x01\x02", Some("application/octet-stream")).expect("payload");
        assert_eq!(
            binary,
            Payload::Binary(BinaryBody {
                content_type: Some(String::from("application/octet-stream")),
                bytes: vec![0, 1, 2],
            })
        );
    }

    #[test]
    fn empty_body_is_empty_payload() {
        assert_eq!(normalize(b"", JSON).expect("payload"), Payload::Empty);
        assert_eq!(normalize(b"  \n", None).expect("payload"), Payload::Empty);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let error = normalize(b"{not json", JSON).expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::Unknown);
        assert_eq!(error.code(), Some("decode_error"));
        assert!(!error.retryable());
    }

    #[test]
    fn unlabelled_json_is_detected() {
        let payload = normalize(br#"{"data":{"ok":true}}"#, None).expect("payload");
        assert_eq!(payload, Payload::Json(json!({"ok": true})));
    }

    #[test]
    fn into_json_decodes_caller_types() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Account {
            id: u64,
            balance: f64,
        }

        let payload = Payload::Json(json!({"id": 42, "balance": 1250.5}));
        let account: Account = payload.into_json().expect("decode");
        assert_eq!(account, Account { id: 42, balance: 1250.5 });

        let error = Payload::Json(json!({"id": "x"}))
            .into_json::<Account>()
            .expect_err("shape mismatch");
        assert_eq!(error.code(), Some("decode_error"));

        let nothing: Option<Account> = Payload::Empty.into_json().expect("null");
        assert_eq!(nothing, None);
    }
}
