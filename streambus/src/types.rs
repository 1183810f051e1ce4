//! Core identifier types for the `StreamBus` middleware.
//!
//! All identifiers use smart constructors so that a value, once constructed,
//! is valid everywhere it flows ("parse, don't validate"). Topic names key
//! schema lookup and metric labels; stream and durable names address broker
//! resources.

use nutype::nutype;

/// A logical topic name, used to resolve schemas and label metrics.
///
/// `TopicName` values are guaranteed to be non-empty and at most 255
/// characters after trimming.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct TopicName(String);

/// The name of a persistent stream on the broker.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamName(String);

/// A durable consumer name: a broker-persisted consumer position that
/// survives process restarts.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct DurableName(String);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn topic_name_accepts_valid_strings(s in "[a-zA-Z0-9._-]{1,255}") {
            let result = TopicName::try_new(s.clone());
            prop_assert!(result.is_ok());
            let name = result.unwrap();
            prop_assert_eq!(name.as_ref(), &s);
        }

        #[test]
        fn topic_name_trims_whitespace(s in " {0,10}[a-zA-Z0-9._-]{1,240} {0,10}") {
            let result = TopicName::try_new(s.clone());
            prop_assert!(result.is_ok());
            let name = result.unwrap();
            prop_assert_eq!(name.as_ref(), s.trim());
        }

        #[test]
        fn topic_name_rejects_blank_strings(s in " {0,50}") {
            prop_assert!(TopicName::try_new(s).is_err());
        }

        #[test]
        fn stream_name_roundtrip_serialization(s in "[a-zA-Z0-9_-]{1,255}") {
            let name = StreamName::try_new(s).unwrap();
            let json = serde_json::to_string(&name).unwrap();
            let deserialized: StreamName = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(name, deserialized);
        }
    }

    #[test]
    fn identifiers_reject_over_length_input() {
        let long = "a".repeat(256);
        assert!(TopicName::try_new(long.clone()).is_err());
        assert!(StreamName::try_new(long.clone()).is_err());
        assert!(DurableName::try_new(long).is_err());

        let max = "a".repeat(255);
        assert!(TopicName::try_new(max.clone()).is_ok());
        assert!(StreamName::try_new(max.clone()).is_ok());
        assert!(DurableName::try_new(max).is_ok());
    }

    #[test]
    fn durable_name_rejects_empty() {
        assert!(DurableName::try_new("").is_err());
        assert!(DurableName::try_new("   ").is_err());
    }
}
