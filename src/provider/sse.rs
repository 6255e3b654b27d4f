//! Server-sent event framing for OpenAI-compatible streaming responses.

use crate::error::GenerationError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    /// Legacy completions endpoints put text here instead of `delta`.
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Drain every complete `data:` line from `buffer`, leaving a trailing partial line in place.
///
/// Lines are cut on raw bytes so a multi-byte character split across network chunks is
/// only decoded once its line is complete.
pub fn drain_deltas(buffer: &mut Vec<u8>) -> Vec<Result<String, GenerationError>> {
    let mut deltas = Vec::new();

    while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
        let line_bytes: Vec<u8> = buffer.drain(..=newline_pos).collect();
        let line = String::from_utf8_lossy(&line_bytes);
        let line = line.trim_end_matches(['\n', '\r']);

        let Some(payload) = line.strip_prefix("data:") else {
            // event:, id:, retry:, comments and blank separators
            continue;
        };
        let payload = payload.trim_start();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<ChunkResponse>(payload) {
            Ok(chunk) => {
                for choice in chunk.choices {
                    let text = choice.delta.content.or(choice.text);
                    if let Some(text) = text.filter(|t| !t.is_empty()) {
                        deltas.push(Ok(text));
                    }
                }
            }
            Err(e) => deltas.push(Err(GenerationError::Provider(format!(
                "SSE parse error: {}",
                e
            )))),
        }
    }

    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drains_complete_lines_only() {
        let mut buffer = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi".to_vec();
        let deltas = drain_deltas(&mut buffer);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap(), "Hel");
        assert_eq!(buffer, b"data: {\"choi".to_vec());

        buffer.extend_from_slice(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n");
        let deltas = drain_deltas(&mut buffer);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap(), "lo");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_split_multibyte_character() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"é\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut buffer = line[..split].to_vec();
        assert!(drain_deltas(&mut buffer).is_empty());
        buffer.extend_from_slice(&line[split..]);
        let deltas = drain_deltas(&mut buffer);
        assert_eq!(deltas[0].as_ref().unwrap(), "é");
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let mut buffer = b"data: {not json}\n".to_vec();
        let deltas = drain_deltas(&mut buffer);
        assert!(deltas[0].is_err());
    }
}
