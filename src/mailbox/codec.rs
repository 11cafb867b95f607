//! Envelope text codec.
//!
//! Commands and responses travel as flat `field: value` lines, one field per
//! line, with newlines and backslashes escaped inside values. The format is
//! self-describing and survives being inspected with a file manager on the
//! device, which is how the transport gets debugged in practice.
//!
//! Decoding has two passes. The strict pass requires every non-empty line to
//! be a well-formed field. The lenient pass pattern-searches the payload for
//! known fields and is the fallback for partially written files — the
//! transport is not transactional, so a read can observe a truncated write.
//! Lenience here is a deliberate availability-over-strictness tradeoff.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// The client-issued operation carried by a [`CommandEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe; the orchestrator answers without subprocess work.
    Ping,
    /// Compile `source_text` as if it were a file named `file_name`.
    Compile {
        file_name: String,
        source_text: String,
    },
    /// Execute a previously produced artifact.
    Run { artifact_path: String },
}

/// One in-flight request. Immutable once written to the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: Command,
    /// Unix-epoch millisecond issuance stamp. Echoed back in the response so
    /// the driver can discard answers to requests it has abandoned.
    pub issued_at_ms: u64,
}

/// The orchestrator's answer to exactly one consumed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub ok: bool,
    /// Echo of the command's issuance stamp (0 when recovered leniently).
    pub issued_at_ms: u64,
    pub artifact_path: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

/// Why a payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown command kind `{0}`")]
    UnknownKind(String),
    #[error("unparseable payload")]
    Malformed,
}

/// Encode a command envelope. Infallible for well-formed inputs.
pub fn encode_command(envelope: &CommandEnvelope) -> String {
    let mut out = String::new();
    match &envelope.command {
        Command::Ping => {
            push_field(&mut out, "kind", "ping");
        }
        Command::Compile {
            file_name,
            source_text,
        } => {
            push_field(&mut out, "kind", "compile");
            push_field(&mut out, "file_name", file_name);
            push_field(&mut out, "source_text", source_text);
        }
        Command::Run { artifact_path } => {
            push_field(&mut out, "kind", "run");
            push_field(&mut out, "artifact_path", artifact_path);
        }
    }
    push_field(&mut out, "issued_at", &envelope.issued_at_ms.to_string());
    out
}

/// Encode a response envelope. Optional fields are omitted when absent.
pub fn encode_response(envelope: &ResponseEnvelope) -> String {
    let mut out = String::new();
    push_field(&mut out, "ok", if envelope.ok { "true" } else { "false" });
    push_field(&mut out, "issued_at", &envelope.issued_at_ms.to_string());
    if let Some(path) = &envelope.artifact_path {
        push_field(&mut out, "artifact_path", path);
    }
    push_field(&mut out, "stdout", &envelope.stdout);
    push_field(&mut out, "stderr", &envelope.stderr);
    push_field(&mut out, "duration_ms", &envelope.duration_ms.to_string());
    if let Some(code) = envelope.exit_code {
        push_field(&mut out, "exit_code", &code.to_string());
    }
    if let Some(message) = &envelope.error_message {
        push_field(&mut out, "error_message", message);
    }
    out
}

/// Decode a command payload, falling back to lenient field extraction.
pub fn decode_command(text: &str) -> Result<CommandEnvelope, DecodeError> {
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    let strict = strict_fields(text).and_then(|fields| command_from_fields(&fields));
    match strict {
        Ok(envelope) => Ok(envelope),
        Err(first) => command_from_fields(&lenient_fields(text)).map_err(|_| first),
    }
}

/// Decode a response payload, falling back to lenient field extraction.
pub fn decode_response(text: &str) -> Result<ResponseEnvelope, DecodeError> {
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    let strict = strict_fields(text).and_then(|fields| response_from_fields(&fields));
    match strict {
        Ok(envelope) => Ok(envelope),
        Err(first) => response_from_fields(&lenient_fields(text)).map_err(|_| first),
    }
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(&escape(value));
    out.push('\n');
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Strict pass: every non-empty line must be `name: value`.
fn strict_fields(text: &str) -> Result<HashMap<String, String>, DecodeError> {
    let mut fields = HashMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(DecodeError::Malformed);
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        fields.insert(name.trim().to_string(), unescape(value));
    }
    Ok(fields)
}

/// Lenient pass: pattern-search for known fields, ignoring everything else.
fn lenient_fields(text: &str) -> HashMap<String, String> {
    static FIELD_RE: OnceLock<Regex> = OnceLock::new();
    let re = FIELD_RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(kind|ok|issued_at|file_name|source_text|artifact_path|stdout|stderr|duration_ms|exit_code|error_message)[ \t]*:[ \t]?(.*)$",
        )
        .expect("field regex is valid")
    });

    let mut fields = HashMap::new();
    for captures in re.captures_iter(text) {
        fields.insert(captures[1].to_string(), unescape(&captures[2]));
    }
    fields
}

fn command_from_fields(fields: &HashMap<String, String>) -> Result<CommandEnvelope, DecodeError> {
    let kind = fields
        .get("kind")
        .ok_or(DecodeError::MissingField("kind"))?;

    let command = match kind.trim().to_ascii_lowercase().as_str() {
        "ping" => Command::Ping,
        "compile" => Command::Compile {
            file_name: fields
                .get("file_name")
                .cloned()
                .ok_or(DecodeError::MissingField("file_name"))?,
            source_text: fields.get("source_text").cloned().unwrap_or_default(),
        },
        "run" => Command::Run {
            artifact_path: fields
                .get("artifact_path")
                .cloned()
                .ok_or(DecodeError::MissingField("artifact_path"))?,
        },
        other => return Err(DecodeError::UnknownKind(other.to_string())),
    };

    Ok(CommandEnvelope {
        command,
        issued_at_ms: parse_u64(fields.get("issued_at")),
    })
}

fn response_from_fields(fields: &HashMap<String, String>) -> Result<ResponseEnvelope, DecodeError> {
    let ok = match fields.get("ok").map(|v| v.trim()) {
        Some("true") => true,
        Some("false") => false,
        _ => return Err(DecodeError::MissingField("ok")),
    };

    Ok(ResponseEnvelope {
        ok,
        issued_at_ms: parse_u64(fields.get("issued_at")),
        artifact_path: fields.get("artifact_path").cloned(),
        stdout: fields.get("stdout").cloned().unwrap_or_default(),
        stderr: fields.get("stderr").cloned().unwrap_or_default(),
        duration_ms: parse_u64(fields.get("duration_ms")),
        exit_code: fields.get("exit_code").and_then(|v| v.trim().parse().ok()),
        error_message: fields.get("error_message").cloned(),
    })
}

fn parse_u64(value: Option<&String>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_ping() {
        let envelope = CommandEnvelope {
            command: Command::Ping,
            issued_at_ms: 1_700_000_000_123,
        };
        let decoded = decode_command(&encode_command(&envelope)).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn roundtrip_compile_multiline_source() {
        let envelope = CommandEnvelope {
            command: Command::Compile {
                file_name: "Main.kt".to_string(),
                source_text: "fun main() {\n    println(\"hi\\\\there\")\n}\n".to_string(),
            },
            issued_at_ms: 42,
        };
        let decoded = decode_command(&encode_command(&envelope)).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn roundtrip_run() {
        let envelope = CommandEnvelope {
            command: Command::Run {
                artifact_path: "/work/compiled/Main.jar".to_string(),
            },
            issued_at_ms: 7,
        };
        let decoded = decode_command(&encode_command(&envelope)).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn roundtrip_response_all_fields() {
        let envelope = ResponseEnvelope {
            ok: true,
            issued_at_ms: 42,
            artifact_path: Some("/work/compiled/Main.jar".to_string()),
            stdout: "warning: unused\nvariable x\n".to_string(),
            stderr: String::new(),
            duration_ms: 1234,
            exit_code: Some(0),
            error_message: None,
        };
        let decoded = decode_response(&encode_response(&envelope)).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn roundtrip_response_failure_fields() {
        let envelope = ResponseEnvelope {
            ok: false,
            issued_at_ms: 9,
            artifact_path: None,
            stdout: String::new(),
            stderr: "Main.kt:1:1: error: expecting a top level declaration".to_string(),
            duration_ms: 88,
            exit_code: Some(1),
            error_message: Some("compilation failed".to_string()),
        };
        let decoded = decode_response(&encode_response(&envelope)).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_empty_payload() {
        assert_eq!(decode_response("   \n"), Err(DecodeError::Empty));
        assert_eq!(decode_command(""), Err(DecodeError::Empty));
    }

    #[test]
    fn decode_unknown_kind() {
        let err = decode_command("kind: reboot\nissued_at: 1\n").unwrap_err();
        assert_eq!(err, DecodeError::UnknownKind("reboot".to_string()));
    }

    #[test]
    fn decode_missing_required_field() {
        let err = decode_command("kind: run\nissued_at: 1\n").unwrap_err();
        assert_eq!(err, DecodeError::MissingField("artifact_path"));
    }

    // A write cut off mid-line leaves a dangling fragment with no colon.
    // The strict pass rejects the payload; the lenient pass must still
    // recover the fields that made it to disk.
    #[test]
    fn lenient_recovers_truncated_response() {
        let truncated = "ok: true\nissued_at: 42\nstdout: all good\nduration_ms: 10\nexit_cod";
        let decoded = decode_response(truncated).unwrap();
        assert!(decoded.ok);
        assert_eq!(decoded.issued_at_ms, 42);
        assert_eq!(decoded.stdout, "all good");
        assert_eq!(decoded.exit_code, None);
    }

    #[test]
    fn lenient_recovers_interleaved_garbage() {
        let garbled = "### partial write ###\nok: false\nerror_message: kotlinc not found\n\u{0}\u{0}";
        let decoded = decode_response(garbled).unwrap();
        assert!(!decoded.ok);
        assert_eq!(
            decoded.error_message.as_deref(),
            Some("kotlinc not found")
        );
    }

    #[test]
    fn garbage_without_ok_marker_is_malformed() {
        let err = decode_response("no structure here at all").unwrap_err();
        assert_eq!(err, DecodeError::Malformed);
    }

    #[test]
    fn response_defaults_for_absent_optionals() {
        let decoded = decode_response("ok: true\n").unwrap();
        assert!(decoded.ok);
        assert_eq!(decoded.issued_at_ms, 0);
        assert!(decoded.artifact_path.is_none());
        assert!(decoded.stdout.is_empty());
        assert_eq!(decoded.exit_code, None);
    }

    #[test]
    fn compile_without_source_text_defaults_empty() {
        let decoded = decode_command("kind: compile\nfile_name: A.kt\n").unwrap();
        match decoded.command {
            Command::Compile {
                file_name,
                source_text,
            } => {
                assert_eq!(file_name, "A.kt");
                assert!(source_text.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
