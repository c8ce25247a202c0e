// SPDX-License-Identifier: MIT OR Apache-2.0

//! The coordinator↔worker line protocol (design document §4.A).
//!
//! One [`Message`] is encoded per line of UTF-8 text. [`encode`] never
//! fails; [`decode`] never panics and returns `None` for anything it can't
//! parse, so a corrupt or foreign line never aborts the stream — the caller
//! just skips it and keeps reading.

use serde::{Deserialize, Serialize};

/// A single test discovered by the worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTest {
    /// The identifier used to route events and build filters.
    pub fully_qualified_name: String,
    /// A human-friendly name, not necessarily unique.
    pub display_name: String,
    /// Present when the worker's framework adapter reports the test as
    /// statically skipped (e.g. `[Ignore]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// A message exchanged between the coordinator (C) and a worker (W).
///
/// The `type` field is the wire discriminator and the compatibility pivot:
/// new variants may be added and must be tolerated by decoders that don't
/// recognize them (serde does this by default — an unknown `type` value
/// simply fails to deserialize as `Message`, which [`decode`] treats the
/// same as any other malformed line).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// C→W: ask the worker to discover tests in an assembly.
    Discover {
        /// Path to the assembly to load.
        assembly: String,
    },
    /// C→W: ask the worker to run tests in an assembly.
    Run {
        /// Path to the assembly to load.
        assembly: String,
        /// Specific test identifiers to run; `None` means "all discovered".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tests: Option<Vec<String>>,
        /// Per-test soft timeout forwarded to the worker's engine.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
    /// C→W: request graceful termination.
    Cancel,
    /// W→C: the result of a `discover` request.
    Discovered {
        /// Every test the worker's adapter found in the assembly.
        tests: Vec<DiscoveredTest>,
    },
    /// W→C: a test has begun executing.
    Started {
        /// The test's identifier.
        fully_qualified_name: String,
        /// The test's display name.
        display_name: String,
    },
    /// W→C: a test passed.
    Passed {
        /// The test's identifier.
        fully_qualified_name: String,
        /// The test's display name.
        display_name: String,
        /// How long the test took to run.
        duration_ms: u64,
    },
    /// W→C: a test failed.
    Failed {
        /// The test's identifier.
        fully_qualified_name: String,
        /// The test's display name.
        display_name: String,
        /// How long the test took to run.
        duration_ms: u64,
        /// A short description of the failure.
        error_message: String,
        /// An optional stack trace.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack_trace: Option<String>,
    },
    /// W→C: a test was skipped.
    Skipped {
        /// The test's identifier.
        fully_qualified_name: String,
        /// The test's display name.
        display_name: String,
        /// An optional reason the test was skipped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// W→C: free-form output produced while a test was running.
    Output {
        /// The test's identifier, if output could be attributed to one.
        fully_qualified_name: String,
        /// The raw text of one chunk of output.
        text: String,
    },
    /// W→C: the `run` operation has finished.
    Completed {
        /// Number of tests that passed.
        passed: u64,
        /// Number of tests that failed.
        failed: u64,
        /// Number of tests that were skipped.
        skipped: u64,
        /// Total wall-clock duration of the run, in milliseconds.
        total_duration_ms: u64,
    },
    /// W→C: an unrecoverable error occurred in the worker.
    Error {
        /// A short description of the error.
        message: String,
        /// Optional additional detail (e.g. an exception dump).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

/// Encodes `msg` as a single line of text, without a trailing newline. The
/// caller (the writer half of a stream) is responsible for appending the
/// newline and flushing.
pub fn encode(msg: &Message) -> String {
    serde_json::to_string(msg).expect("Message always serializes to JSON")
}

/// Decodes one line of text into a [`Message`].
///
/// Returns `None` for anything that isn't a structurally valid message:
/// non-JSON noise from the assembly under test, a line from a future
/// protocol version this build doesn't understand, or outright garbage.
/// Malformed lines are logged at `debug` level and otherwise ignored; they
/// must never abort the stream.
pub fn decode(line: &str) -> Option<Message> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Message>(line) {
        Ok(msg) => Some(msg),
        Err(error) => {
            tracing::debug!(%error, line, "skipping unparseable protocol line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_ignores_plain_noise() {
        assert_eq!(decode("HELLO STDOUT"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode("{ not json"), None);
    }

    #[test]
    fn encode_then_decode_discover() {
        let msg = Message::Discover {
            assembly: "tests.dll".to_string(),
        };
        let line = encode(&msg);
        assert!(!line.ends_with('\n'));
        assert_eq!(decode(&line), Some(msg));
    }

    #[test]
    fn null_fields_are_elided_and_tolerated() {
        let msg = Message::Run {
            assembly: "tests.dll".to_string(),
            tests: None,
            timeout_seconds: None,
        };
        let line = encode(&msg);
        assert!(!line.contains("tests"));
        assert!(!line.contains("timeoutSeconds"));
        assert_eq!(decode(&line), Some(msg));
    }

    #[test]
    fn field_naming_is_lower_camel() {
        let msg = Message::Failed {
            fully_qualified_name: "A.B".to_string(),
            display_name: "A.B".to_string(),
            duration_ms: 5,
            error_message: "boom".to_string(),
            stack_trace: None,
        };
        let line = encode(&msg);
        assert!(line.contains("\"fullyQualifiedName\""));
        assert!(line.contains("\"durationMs\""));
        assert!(line.contains("\"errorMessage\""));
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        let fqn = "[A-Za-z][A-Za-z0-9._]{0,20}";
        prop_oneof![
            fqn.prop_map(|assembly| Message::Discover { assembly }),
            (fqn, proptest::option::of(proptest::collection::vec(fqn, 0..3)), any::<Option<u64>>())
                .prop_map(|(assembly, tests, timeout_seconds)| Message::Run {
                    assembly,
                    tests,
                    timeout_seconds
                }),
            Just(Message::Cancel),
            (fqn, fqn).prop_map(|(fully_qualified_name, display_name)| Message::Started {
                fully_qualified_name,
                display_name
            }),
            (fqn, fqn, any::<u64>()).prop_map(|(fully_qualified_name, display_name, duration_ms)| {
                Message::Passed {
                    fully_qualified_name,
                    display_name,
                    duration_ms,
                }
            }),
            any::<(u64, u64, u64, u64)>().prop_map(|(passed, failed, skipped, total_duration_ms)| {
                Message::Completed {
                    passed,
                    failed,
                    skipped,
                    total_duration_ms,
                }
            }),
        ]
    }

    proptest! {
        #[test]
        fn round_trip_is_identity(msg in arb_message()) {
            let line = encode(&msg);
            prop_assert_eq!(decode(&line), Some(msg));
        }
    }
}
