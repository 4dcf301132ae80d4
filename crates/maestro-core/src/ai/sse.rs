//! Server-Sent Events scanning for chat-completions streams
//!
//! Incoming bytes are split into lines; `data: ` payloads are parsed as
//! JSON deltas. `data: [DONE]` terminates the stream.

use anyhow::Result;
use serde_json::Value;

use crate::ai::types::Usage;

/// One decoded SSE payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// `choices[0].delta.content` fragment.
    TextDelta(String),
    /// Usage block (some providers attach it to the final chunk).
    Usage(Usage),
    /// `data: [DONE]`
    Done,
    /// Keep-alive, empty delta, or an event we don't consume.
    Skip,
}

/// Accumulates raw bytes and yields complete SSE events.
///
/// Chunk boundaries are arbitrary — a payload may arrive split across any
/// number of reads — so the scanner holds the trailing partial line.
#[derive(Debug, Default)]
pub struct SseScanner {
    buffer: String,
}

impl SseScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = parse_line(line)? {
                let done = event == SseEvent::Done;
                events.push(event);
                if done {
                    break;
                }
            }
        }
        Ok(events)
    }
}

fn parse_line(line: &str) -> Result<Option<SseEvent>> {
    let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
        // Comments, `event:` lines, and blank separators are not consumed.
        return Ok(None);
    };
    let data = data.trim();

    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| anyhow::anyhow!("malformed SSE payload: {e}: {data}"))?;
    Ok(Some(parse_payload(&json)?))
}

/// Decode one chat-completions chunk object.
pub fn parse_payload(json: &Value) -> Result<SseEvent> {
    // Error chunks: {"error": {"message": "...", "type": "..."}}
    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        let error_type = error
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("unknown");
        return Err(anyhow::anyhow!("API error ({error_type}): {message}"));
    }

    if let Some(choice) = json.get("choices").and_then(|c| c.as_array()).and_then(|c| c.first()) {
        if let Some(content) = choice
            .pointer("/delta/content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
        {
            return Ok(SseEvent::TextDelta(content.to_string()));
        }
    }

    if let Some(usage) = json.get("usage").and_then(parse_usage) {
        return Ok(SseEvent::Usage(usage));
    }

    Ok(SseEvent::Skip)
}

/// Pull a usage block out of a response body or chunk.
pub fn parse_usage(usage: &Value) -> Option<Usage> {
    let prompt = usage.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as usize;
    let completion = usage
        .get("completion_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;
    if prompt == 0 && completion == 0 {
        return None;
    }
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: usage
            .get("total_tokens")
            .and_then(|t| t.as_u64())
            .map(|t| t as usize)
            .unwrap_or(prompt + completion),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_chunk(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{text}\"}},\"index\":0}}]}}\n"
        )
    }

    #[test]
    fn scans_complete_lines() {
        let mut scanner = SseScanner::new();
        let events = scanner
            .push(format!("{}{}", delta_chunk("Hello"), delta_chunk(" world")).as_bytes())
            .unwrap();
        assert_eq!(
            events,
            vec![
                SseEvent::TextDelta("Hello".into()),
                SseEvent::TextDelta(" world".into())
            ]
        );
    }

    #[test]
    fn holds_partial_line_across_pushes() {
        let mut scanner = SseScanner::new();
        let chunk = delta_chunk("split");
        let (a, b) = chunk.split_at(20);

        assert!(scanner.push(a.as_bytes()).unwrap().is_empty());
        let events = scanner.push(b.as_bytes()).unwrap();
        assert_eq!(events, vec![SseEvent::TextDelta("split".into())]);
    }

    #[test]
    fn done_terminates() {
        let mut scanner = SseScanner::new();
        let events = scanner.push(b"data: [DONE]\n").unwrap();
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let mut scanner = SseScanner::new();
        let events = scanner.push(b"\n: keep-alive\nevent: message\n").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let mut scanner = SseScanner::new();
        assert!(scanner.push(b"data: {not json}\n").is_err());
    }

    #[test]
    fn error_payload_surfaces_message() {
        let mut scanner = SseScanner::new();
        let err = scanner
            .push(b"data: {\"error\":{\"message\":\"model overloaded\",\"type\":\"server_error\"}}\n")
            .unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn usage_chunk_is_decoded() {
        let mut scanner = SseScanner::new();
        let events = scanner
            .push(b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":34}}\n")
            .unwrap();
        assert_eq!(
            events,
            vec![SseEvent::Usage(Usage {
                prompt_tokens: 12,
                completion_tokens: 34,
                total_tokens: 46
            })]
        );
    }
}
