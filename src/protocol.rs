//! The newline-delimited JSON wire format.
//!
//! Every processed frame is sent as exactly one line of UTF-8 JSON, terminated by `\n`. The JSON
//! text itself never contains a newline, so clients can frame messages by splitting on `\n`.
//!
//! Two incompatible message layouts exist, selected with [`Schema`]. Server and client have to
//! agree on the schema out of band; a line does not identify its own schema.

use clap::ValueEnum;
use thiserror::Error;

use crate::hand::{HandDetection, Landmark};

/// Message layout of a streamed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Schema {
    /// Protocol v2: one object per hand, `{"label": "Left"|"Right", "landmarks": [[x, y, z], ...]}`.
    #[default]
    Labeled,
    /// Protocol v1: a single array of `[x, y, z]` triples, concatenated across all hands without
    /// any hand boundaries or labels.
    Flat,
}

impl Schema {
    /// The protocol version number of this schema.
    pub fn version(self) -> u32 {
        match self {
            Schema::Flat => 1,
            Schema::Labeled => 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    /// A landmark coordinate was NaN or infinite. JSON has no representation for those.
    #[error("hand {hand} has a non-finite landmark coordinate")]
    NonFinite { hand: usize },
    #[error("failed to serialize frame: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not terminated by a newline")]
    Unterminated,
    #[error("line contains more than one message")]
    EmbeddedNewline,
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded line, as a client sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Labeled(Vec<HandDetection>),
    Flat(Vec<Landmark>),
}

impl Message {
    /// Returns the number of landmarks carried by this message.
    pub fn landmark_count(&self) -> usize {
        match self {
            Message::Labeled(hands) => hands.iter().map(|h| h.landmarks().len()).sum(),
            Message::Flat(landmarks) => landmarks.len(),
        }
    }
}

/// Serializes the hands detected in one frame into a single newline-terminated line.
///
/// An empty slice produces `[]\n` in both schemas.
pub fn encode_line(hands: &[HandDetection], schema: Schema) -> Result<Vec<u8>, EncodeError> {
    if let Some(hand) = hands.iter().position(|hand| !hand.is_finite()) {
        return Err(EncodeError::NonFinite { hand });
    }

    let mut line = match schema {
        Schema::Labeled => serde_json::to_vec(hands)?,
        Schema::Flat => {
            let flat = hands
                .iter()
                .flat_map(|hand| hand.landmarks().iter())
                .collect::<Vec<_>>();
            serde_json::to_vec(&flat)?
        }
    };
    debug_assert!(!line.contains(&b'\n'));
    line.push(b'\n');
    Ok(line)
}

/// Parses one line (including its trailing `\n`) produced by [`encode_line`].
///
/// Objects with missing or unknown fields, hands with a landmark count other than
/// [`NUM_LANDMARKS`][crate::hand::NUM_LANDMARKS], and landmarks that aren't 3-element arrays are
/// rejected.
pub fn decode_line(line: &str, schema: Schema) -> Result<Message, DecodeError> {
    let Some(body) = line.strip_suffix('\n') else {
        return Err(DecodeError::Unterminated);
    };
    if body.contains('\n') {
        return Err(DecodeError::EmbeddedNewline);
    }

    Ok(match schema {
        Schema::Labeled => Message::Labeled(serde_json::from_str(body)?),
        Schema::Flat => Message::Flat(serde_json::from_str(body)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand::{Handedness, NUM_LANDMARKS};

    fn hand(label: Handedness, lm: [f32; 3]) -> HandDetection {
        HandDetection::new(label, [Landmark::from(lm); NUM_LANDMARKS])
    }

    fn line(hands: &[HandDetection], schema: Schema) -> String {
        String::from_utf8(encode_line(hands, schema).unwrap()).unwrap()
    }

    #[test]
    fn no_hands() {
        assert_eq!(line(&[], Schema::Labeled), "[]\n");
        assert_eq!(line(&[], Schema::Flat), "[]\n");
    }

    #[test]
    fn single_right_hand() {
        let triples = vec!["[0.5,0.5,0.0]"; NUM_LANDMARKS].join(",");
        let expected = format!(r#"[{{"label":"Right","landmarks":[{triples}]}}]"#) + "\n";
        assert_eq!(
            line(&[hand(Handedness::Right, [0.5, 0.5, 0.0])], Schema::Labeled),
            expected
        );
    }

    #[test]
    fn labeled_preserves_order() {
        let hands = [
            hand(Handedness::Left, [0.1, 0.2, 0.0]),
            hand(Handedness::Right, [0.7, 0.8, -0.1]),
            hand(Handedness::Left, [0.3, 0.3, 0.3]),
        ];
        let text = line(&hands, Schema::Labeled);
        assert_eq!(text.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        let labels = entries
            .iter()
            .map(|e| e["label"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(labels, ["Left", "Right", "Left"]);
        for entry in entries {
            let obj = entry.as_object().unwrap();
            assert_eq!(obj.len(), 2);
            let landmarks = obj["landmarks"].as_array().unwrap();
            assert_eq!(landmarks.len(), NUM_LANDMARKS);
            for lm in landmarks {
                let lm = lm.as_array().unwrap();
                assert_eq!(lm.len(), 3);
                assert!(lm.iter().all(|c| c.as_f64().unwrap().is_finite()));
            }
        }

        match decode_line(&text, Schema::Labeled).unwrap() {
            Message::Labeled(decoded) => assert_eq!(decoded, hands),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn flat_concatenates_hands() {
        let hands = [
            hand(Handedness::Left, [0.25, 0.5, 0.0]),
            hand(Handedness::Right, [0.75, 0.5, 0.0]),
        ];
        let text = line(&hands, Schema::Flat);
        assert!(!text.contains("label"));

        let msg = decode_line(&text, Schema::Flat).unwrap();
        assert_eq!(msg.landmark_count(), 2 * NUM_LANDMARKS);
        let Message::Flat(landmarks) = msg else {
            panic!("expected flat message");
        };
        assert_eq!(landmarks[0], Landmark::new(0.25, 0.5, 0.0));
        assert_eq!(landmarks[NUM_LANDMARKS], Landmark::new(0.75, 0.5, 0.0));
    }

    #[test]
    fn non_finite_is_rejected() {
        let hands = [
            hand(Handedness::Left, [0.5, 0.5, 0.0]),
            hand(Handedness::Right, [f32::INFINITY, 0.5, 0.0]),
        ];
        assert!(matches!(
            encode_line(&hands, Schema::Labeled),
            Err(EncodeError::NonFinite { hand: 1 })
        ));
        assert!(matches!(
            encode_line(&hands, Schema::Flat),
            Err(EncodeError::NonFinite { hand: 1 })
        ));
    }

    #[test]
    fn decode_rejects_schema_violations() {
        let lm = "[0.5,0.5,0.0]";
        let full = vec![lm; NUM_LANDMARKS].join(",");
        let short = vec![lm; NUM_LANDMARKS - 1].join(",");

        let ok = format!(r#"[{{"label":"Left","landmarks":[{full}]}}]"#) + "\n";
        assert!(decode_line(&ok, Schema::Labeled).is_ok());

        let missing_label = format!(r#"[{{"landmarks":[{full}]}}]"#) + "\n";
        let extra_field = format!(r#"[{{"label":"Left","score":1.0,"landmarks":[{full}]}}]"#) + "\n";
        let too_few = format!(r#"[{{"label":"Left","landmarks":[{short}]}}]"#) + "\n";
        let bad_label = format!(r#"[{{"label":"Both","landmarks":[{full}]}}]"#) + "\n";
        for bad in [missing_label, extra_field, too_few, bad_label] {
            assert!(
                matches!(decode_line(&bad, Schema::Labeled), Err(DecodeError::Json(_))),
                "accepted {bad:?}"
            );
        }

        assert!(matches!(
            decode_line("[]", Schema::Flat),
            Err(DecodeError::Unterminated)
        ));
        assert!(matches!(
            decode_line("[]\n[]\n", Schema::Flat),
            Err(DecodeError::EmbeddedNewline)
        ));
        assert!(matches!(
            decode_line("[[0.5,0.5]]\n", Schema::Flat),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn versions() {
        assert_eq!(Schema::default(), Schema::Labeled);
        assert_eq!(Schema::Labeled.version(), 2);
        assert_eq!(Schema::Flat.version(), 1);
    }
}
