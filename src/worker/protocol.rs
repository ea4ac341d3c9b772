//! Wire protocol between the pool and a worker process.
//!
//! Workers announce their loopback HTTP endpoint by printing a sentinel
//! line on stdout, then answer exactly one form-encoded POST with a JSON
//! reply envelope.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{JobFailure, PoolError};

/// Marker a worker prints on stdout, immediately followed by its port.
pub const PORT_SENTINEL: &str = "#|#port#|#";

/// Name of the form field carrying the JSON-serialized payload.
pub const PAYLOAD_FIELD: &str = "data";

/// Extract the announced port from a chunk of worker stdout.
///
/// Returns `None` when the chunk carries no sentinel or the sentinel is not
/// followed by a parseable port. Everything else on stdout is free-form
/// diagnostic text.
pub fn parse_port_announcement(chunk: &str) -> Option<u16> {
    let rest = &chunk[chunk.find(PORT_SENTINEL)? + PORT_SENTINEL.len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReplyStatus {
    Success,
    Fail,
}

#[derive(Debug, Deserialize)]
struct WorkerReply {
    status: ReplyStatus,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default, rename = "errMessage")]
    err_message: Option<String>,
}

/// Interpret a worker's response body.
///
/// `status: "success"` yields the data payload; `status: "fail"` yields the
/// worker-supplied message plus any partial data; anything unparseable is a
/// malformed response.
pub fn interpret_reply(body: &str) -> Result<Value, JobFailure> {
    let reply: WorkerReply = serde_json::from_str(body).map_err(|err| {
        JobFailure::new(PoolError::MalformedResponse(format!(
            "{err} (content: {body})"
        )))
    })?;

    match reply.status {
        ReplyStatus::Success => Ok(reply.data.unwrap_or(Value::Null)),
        ReplyStatus::Fail => Err(JobFailure::with_data(
            PoolError::WorkerReportedFailure(
                reply.err_message.unwrap_or_else(|| "unknown error".to_string()),
            ),
            reply.data,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_from_plain_announcement() {
        assert_eq!(parse_port_announcement("#|#port#|#4321"), Some(4321));
    }

    #[test]
    fn parses_port_mid_line() {
        assert_eq!(
            parse_port_announcement("starting up #|#port#|#8080 done"),
            Some(8080)
        );
    }

    #[test]
    fn ignores_lines_without_sentinel() {
        assert_eq!(parse_port_announcement("listening on 4321"), None);
        assert_eq!(parse_port_announcement(""), None);
    }

    #[test]
    fn rejects_sentinel_without_port() {
        assert_eq!(parse_port_announcement("#|#port#|#"), None);
        assert_eq!(parse_port_announcement("#|#port#|#not-a-port"), None);
    }

    #[test]
    fn success_reply_carries_data() {
        let value = interpret_reply(r#"{"status":"success","data":{"n":7}}"#).unwrap();
        assert_eq!(value, serde_json::json!({"n": 7}));
    }

    #[test]
    fn success_reply_without_data_is_null() {
        let value = interpret_reply(r#"{"status":"success"}"#).unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn fail_reply_carries_message_and_partial_data() {
        let failure =
            interpret_reply(r#"{"status":"fail","errMessage":"bad input","data":[1]}"#)
                .unwrap_err();
        assert!(matches!(
            &failure.error,
            PoolError::WorkerReportedFailure(msg) if msg == "bad input"
        ));
        assert_eq!(failure.data, Some(serde_json::json!([1])));
    }

    #[test]
    fn garbage_body_is_malformed() {
        let failure = interpret_reply("<html>oops</html>").unwrap_err();
        assert!(matches!(failure.error, PoolError::MalformedResponse(_)));
    }

    #[test]
    fn unknown_status_is_malformed() {
        let failure = interpret_reply(r#"{"status":"maybe"}"#).unwrap_err();
        assert!(matches!(failure.error, PoolError::MalformedResponse(_)));
    }
}
