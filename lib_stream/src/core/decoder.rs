//! # Snapshot Decoder
//!
//! Turns one raw stream message body into a [`Snapshot`]. Decoding is pure:
//! no logging, no state, no merging across messages. Unknown top-level keys
//! are ignored and `null` section values count as absent. A known section whose
//! shape does not validate is recorded as a rejection instead of being
//! defaulted, and the remaining sections of the message are still returned.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::snapshot::{Section, SectionName, SectionRejection, Snapshot};
use crate::error::DecodeError;

/// Decodes one message body.
///
/// # Errors
/// [`DecodeError::Malformed`] if the body is not JSON, [`DecodeError::NotAnObject`]
/// if it is JSON but not an object.
pub fn decode(raw: &str) -> Result<Snapshot, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let Value::Object(mut body) = value else {
        return Err(DecodeError::NotAnObject(json_kind(&value)));
    };

    let mut sections = Vec::new();
    let mut rejected = Vec::new();

    for name in SectionName::ALL {
        match body.remove(name.wire_key()) {
            None | Some(Value::Null) => {}
            Some(section_value) => match decode_section(name, section_value) {
                Ok(section) => sections.push(section),
                Err(reason) => rejected.push(SectionRejection { section: name, reason }),
            },
        }
    }

    Ok(Snapshot::with_rejections(sections, rejected))
}

/// Validates a single section value against the shape of `name`.
pub fn decode_section(name: SectionName, value: Value) -> Result<Section, String> {
    match name {
        SectionName::Overview => typed(value).map(Section::Overview),
        SectionName::Workers => typed(value).map(Section::Workers),
        SectionName::Blockchain => typed(value).map(Section::Blockchain),
        SectionName::TrainingMetrics => typed(value).map(Section::TrainingMetrics),
        SectionName::Security => typed(value).map(Section::Security),
    }
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::WorkerStatus;

    #[test]
    fn test_decode_full_message() {
        let raw = r#"{
            "overview": {
                "metrics": [
                    {"label": "Active Edge Workers", "value": "1/5", "color": "text-green-500"},
                    {"label": "Models Verified", "value": "12", "color": "text-purple-500"}
                ],
                "services": [{"name": "Parameter Server", "status": "running", "uptime": 99.9}]
            },
            "workers": [
                {"id": "worker-01", "status": "training", "dataset": "Medical-A", "samples": 2500, "progress": 73}
            ],
            "blockchain": {
                "latest_block": {"index": 12, "timestamp": 1700000000.5, "round_num": 11,
                                 "model_hash": "9f2c61aa0b7e44d1", "previous_hash": "77aa"}
            },
            "training": {"round": 11, "metrics": [{"label": "Accuracy", "value": 93.3, "target": 90}]},
            "security": {"metrics": [{"label": "Failed Auth", "value": 0, "status": "secure"}]}
        }"#;

        let snapshot = decode(raw).unwrap();
        assert_eq!(snapshot.sections().len(), 5);
        assert!(snapshot.rejected().is_empty());

        match snapshot.get(SectionName::Overview) {
            Some(Section::Overview(o)) => assert_eq!(o.models_verified(), Some(12)),
            other => panic!("unexpected overview: {:?}", other),
        }
        match snapshot.get(SectionName::Workers) {
            Some(Section::Workers(w)) => assert_eq!(w[0].status, WorkerStatus::Training),
            other => panic!("unexpected workers: {:?}", other),
        }
        match snapshot.get(SectionName::Blockchain) {
            Some(Section::Blockchain(tip)) => assert_eq!(tip.latest_block.as_ref().map(|b| b.key()), Some(12)),
            other => panic!("unexpected tip: {:?}", other),
        }
    }

    #[test]
    fn test_absent_null_and_unknown_keys_are_ignored() {
        let snapshot = decode(r#"{"workers": null, "homomorphic": {"x": 1}, "security": {"metrics": []}}"#).unwrap();
        assert_eq!(snapshot.sections().len(), 1);
        assert!(snapshot.contains(SectionName::Security));
        assert!(!snapshot.contains(SectionName::Workers));
        assert!(snapshot.rejected().is_empty());
    }

    #[test]
    fn test_invalid_section_is_rejected_without_losing_the_rest() {
        let raw = r#"{"workers": {"id": "not-a-list"}, "training": {"metrics": []}}"#;
        let snapshot = decode(raw).unwrap();

        assert!(snapshot.contains(SectionName::TrainingMetrics));
        assert!(!snapshot.contains(SectionName::Workers));
        assert_eq!(snapshot.rejected().len(), 1);
        assert_eq!(snapshot.rejected()[0].section, SectionName::Workers);
    }

    #[test]
    fn test_missing_required_field_is_not_defaulted() {
        // An overview without its metrics list must not turn into an empty overview.
        let snapshot = decode(r#"{"overview": {"services": []}}"#).unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.rejected()[0].section, SectionName::Overview);
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(decode("data: not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(""), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_non_object_body() {
        assert_eq!(decode("[1, 2]"), Err(DecodeError::NotAnObject("an array")));
        assert_eq!(decode("\"hello\""), Err(DecodeError::NotAnObject("a string")));
    }

    #[test]
    fn test_unknown_worker_status_is_kept() {
        let snapshot = decode(r#"{"workers": [{"id": "worker-09", "status": "quarantined"}]}"#).unwrap();
        match snapshot.get(SectionName::Workers) {
            Some(Section::Workers(w)) => assert_eq!(w[0].status, WorkerStatus::Unknown),
            other => panic!("unexpected workers: {:?}", other),
        }
    }
}
