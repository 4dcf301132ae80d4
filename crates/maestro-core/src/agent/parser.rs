//! Tag-stream parser
//!
//! Scans a growing buffer of model output for the bracket-tag protocol and
//! emits an ordered event stream. Text outside any tag is response text;
//! `[THINKING]` sections stream with their own role; `[SUMMARY]`, `[PLAN]`
//! and the file-operation tags are buffered until their closer arrives and
//! then emitted as single events.
//!
//! The parser is incremental and restartable: feeding the same bytes in any
//! chunking produces the same events with the same concatenated text.

use serde::Serialize;
use tracing::warn;

/// Which stream a text chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextRole {
    Thinking,
    Response,
}

/// A file operation embedded in agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    Read { path: String },
    Write { path: String, content: String },
    Edit { path: String, find: String, replace: String },
}

impl FileOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::Read { path } | Self::Write { path, .. } | Self::Edit { path, .. } => path,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Read { .. })
    }
}

/// One parsed event, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    Text { role: TextRole, chunk: String },
    Summary { text: String },
    Plan { text: String },
    FileOp { op: FileOperation },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferedTag {
    Summary,
    Plan,
    FileRead,
    FileWrite,
    FileEdit,
}

impl BufferedTag {
    fn closer(self) -> &'static str {
        match self {
            Self::Summary => "[/SUMMARY]",
            Self::Plan => "[/PLAN]",
            Self::FileRead => "[/FILE_READ]",
            Self::FileWrite => "[/FILE_WRITE]",
            Self::FileEdit => "[/FILE_EDIT]",
        }
    }

    fn opener(self) -> &'static str {
        match self {
            Self::Summary => "[SUMMARY]",
            Self::Plan => "[PLAN]",
            Self::FileRead => "[FILE_READ]",
            Self::FileWrite => "[FILE_WRITE]",
            Self::FileEdit => "[FILE_EDIT]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Response,
    Thinking,
    Buffered(BufferedTag),
}

/// What a tag token at the head of the tail resolved to.
enum TagMatch {
    Complete(Tag, usize),
    /// The tail is a prefix of some tag; wait for more input.
    Partial,
    None,
}

#[derive(Debug, Clone, Copy)]
enum Tag {
    ThinkingOpen,
    ThinkingClose,
    /// `[RESPONSE]` / `[/RESPONSE]` markers are swallowed; response is the
    /// implicit default stream.
    ResponseMarker,
    Buffered(BufferedTag),
}

/// Tags recognised while in the response stream.
const RESPONSE_TAGS: &[(&str, Tag)] = &[
    ("[THINKING]", Tag::ThinkingOpen),
    ("[RESPONSE]", Tag::ResponseMarker),
    ("[/RESPONSE]", Tag::ResponseMarker),
    ("[SUMMARY]", Tag::Buffered(BufferedTag::Summary)),
    ("[PLAN]", Tag::Buffered(BufferedTag::Plan)),
    ("[FILE_READ]", Tag::Buffered(BufferedTag::FileRead)),
    ("[FILE_WRITE]", Tag::Buffered(BufferedTag::FileWrite)),
    ("[FILE_EDIT]", Tag::Buffered(BufferedTag::FileEdit)),
];

/// Inside `[THINKING]` only the closer is recognised.
const THINKING_TAGS: &[(&str, Tag)] = &[("[/THINKING]", Tag::ThinkingClose)];

/// Incremental tag parser over a delta stream.
#[derive(Debug)]
pub struct TagParser {
    pending: String,
    state: State,
    body: String,
}

impl Default for TagParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TagParser {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            state: State::Response,
            body: String::new(),
        }
    }

    /// Feed one chunk, returning the events it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<ParseEvent> {
        self.pending.push_str(chunk);
        let mut events = Vec::new();
        self.drain(&mut events);
        events
    }

    /// Signal end of stream. An unterminated buffered tag is demoted to
    /// response text with its opener restored.
    pub fn finish(&mut self) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        self.drain(&mut events);

        match self.state {
            State::Response | State::Thinking => {
                let role = if self.state == State::Thinking {
                    TextRole::Thinking
                } else {
                    TextRole::Response
                };
                if !self.pending.is_empty() {
                    emit_text(&mut events, role, std::mem::take(&mut self.pending));
                }
            }
            State::Buffered(tag) => {
                warn!(tag = tag.opener(), "stream closed inside unterminated tag");
                let mut text = String::from(tag.opener());
                text.push_str(&self.body);
                text.push_str(&self.pending);
                self.body.clear();
                self.pending.clear();
                emit_text(&mut events, TextRole::Response, text);
            }
        }
        self.state = State::Response;
        events
    }

    fn drain(&mut self, events: &mut Vec<ParseEvent>) {
        loop {
            match self.state {
                State::Response | State::Thinking => {
                    if !self.drain_text(events) {
                        return;
                    }
                }
                State::Buffered(tag) => {
                    if !self.drain_buffered(tag, events) {
                        return;
                    }
                }
            }
        }
    }

    /// Consume text up to the next recognised tag. Returns false when more
    /// input is needed.
    fn drain_text(&mut self, events: &mut Vec<ParseEvent>) -> bool {
        let (role, tags) = match self.state {
            State::Thinking => (TextRole::Thinking, THINKING_TAGS),
            _ => (TextRole::Response, RESPONSE_TAGS),
        };

        let mut cursor = 0;
        while let Some(offset) = self.pending[cursor..].find('[') {
            let bracket = cursor + offset;
            match match_tag(&self.pending[bracket..], tags) {
                TagMatch::Complete(tag, len) => {
                    if bracket > 0 {
                        emit_text(events, role, self.pending[..bracket].to_string());
                    }
                    self.pending.drain(..bracket + len);
                    self.apply(tag);
                    return true;
                }
                TagMatch::Partial => {
                    // Possible tag split across chunks: hold the tail.
                    if bracket > 0 {
                        emit_text(events, role, self.pending[..bracket].to_string());
                        self.pending.drain(..bracket);
                    }
                    return false;
                }
                TagMatch::None => {
                    cursor = bracket + 1;
                }
            }
        }

        if !self.pending.is_empty() {
            emit_text(events, role, std::mem::take(&mut self.pending));
        }
        false
    }

    /// Accumulate a buffered tag body until its closer. Returns false when
    /// more input is needed.
    fn drain_buffered(&mut self, tag: BufferedTag, events: &mut Vec<ParseEvent>) -> bool {
        let closer = tag.closer();
        if let Some(at) = self.pending.find(closer) {
            self.body.push_str(&self.pending[..at]);
            self.pending.drain(..at + closer.len());
            let body = std::mem::take(&mut self.body);
            self.state = State::Response;
            self.emit_buffered(tag, body, events);
            return true;
        }

        // Keep any tail that could be the start of the closer.
        let keep = partial_suffix_len(&self.pending, closer);
        let consume = self.pending.len() - keep;
        self.body.push_str(&self.pending[..consume]);
        self.pending.drain(..consume);
        false
    }

    fn apply(&mut self, tag: Tag) {
        self.state = match tag {
            Tag::ThinkingOpen => State::Thinking,
            Tag::ThinkingClose | Tag::ResponseMarker => State::Response,
            Tag::Buffered(buffered) => {
                self.body.clear();
                State::Buffered(buffered)
            }
        };
    }

    fn emit_buffered(&mut self, tag: BufferedTag, body: String, events: &mut Vec<ParseEvent>) {
        match tag {
            BufferedTag::Summary => events.push(ParseEvent::Summary {
                text: body.trim().to_string(),
            }),
            BufferedTag::Plan => events.push(ParseEvent::Plan {
                text: body.trim().to_string(),
            }),
            BufferedTag::FileRead | BufferedTag::FileWrite | BufferedTag::FileEdit => {
                match parse_file_op(tag, &body) {
                    Some(op) => events.push(ParseEvent::FileOp { op }),
                    None => {
                        warn!(tag = tag.opener(), "malformed file operation body");
                        let mut text = String::from(tag.opener());
                        text.push_str(&body);
                        text.push_str(tag.closer());
                        emit_text(events, TextRole::Response, text);
                    }
                }
            }
        }
    }
}

fn emit_text(events: &mut Vec<ParseEvent>, role: TextRole, chunk: String) {
    if chunk.is_empty() {
        return;
    }
    // Coalesce with a preceding chunk of the same role so chunk boundaries
    // don't leak into the event stream.
    if let Some(ParseEvent::Text { role: last_role, chunk: last }) = events.last_mut() {
        if *last_role == role {
            last.push_str(&chunk);
            return;
        }
    }
    events.push(ParseEvent::Text { role, chunk });
}

fn match_tag(tail: &str, tags: &[(&str, Tag)]) -> TagMatch {
    for (token, tag) in tags {
        if tail.starts_with(token) {
            return TagMatch::Complete(*tag, token.len());
        }
    }
    if tags.iter().any(|(token, _)| token.starts_with(tail)) {
        return TagMatch::Partial;
    }
    TagMatch::None
}

/// Length of the longest suffix of `text` that is a proper prefix of `closer`.
fn partial_suffix_len(text: &str, closer: &str) -> usize {
    let max = closer.len().saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        if !text.is_char_boundary(text.len() - len) {
            continue;
        }
        if closer.starts_with(&text[text.len() - len..]) {
            return len;
        }
    }
    0
}

// ── File-operation bodies ──────────────────────────────────────────────

fn parse_file_op(tag: BufferedTag, body: &str) -> Option<FileOperation> {
    match tag {
        BufferedTag::FileRead => {
            let path = field(body, "path:", &[])?;
            Some(FileOperation::Read { path })
        }
        BufferedTag::FileWrite => {
            let path = field(body, "path:", &["content:"])?;
            let content = block_after(body, "content:")?;
            Some(FileOperation::Write { path, content })
        }
        BufferedTag::FileEdit => {
            let path = field(body, "path:", &["find:"])?;
            let find = segment(body, "find:", Some("replace:")).map(strip_block)?;
            let replace = segment(body, "replace:", None).map(strip_block)?;
            Some(FileOperation::Edit { path, find, replace })
        }
        _ => None,
    }
}

/// Single-line field: text after `marker`, ending at the first of `stops`
/// or the end of its line.
fn field(body: &str, marker: &str, stops: &[&str]) -> Option<String> {
    let mut rest = segment(body, marker, None)?;
    for stop in stops {
        if let Some(at) = rest.find(stop) {
            rest = &rest[..at];
        }
    }
    let value = rest.lines().next().unwrap_or("").trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Text between `marker` and `until` (or the end of the body).
fn segment<'a>(body: &'a str, marker: &str, until: Option<&str>) -> Option<&'a str> {
    let start = body.find(marker)? + marker.len();
    let rest = &body[start..];
    match until.and_then(|u| rest.find(u)) {
        Some(end) => Some(&rest[..end]),
        None => Some(rest),
    }
}

/// Block content after a marker: a fenced code block when present,
/// otherwise the trimmed remainder.
fn block_after(body: &str, marker: &str) -> Option<String> {
    let rest = segment(body, marker, None)?;
    let trimmed = rest.trim_start();
    if let Some(after_fence) = trimmed.strip_prefix("```") {
        // Skip an optional language hint on the fence line.
        let content = match after_fence.find('\n') {
            Some(nl) => &after_fence[nl + 1..],
            None => after_fence,
        };
        let end = content.find("```")?;
        return Some(content[..end].to_string());
    }
    Some(rest.trim().to_string())
}

/// Pipe-prefixed block: `find: |` introduces raw lines until the next marker.
fn strip_block(raw: &str) -> String {
    let trimmed = raw.trim_start_matches([' ', '\t']);
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('\n').unwrap_or(trimmed);
    trimmed.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&str]) -> Vec<ParseEvent> {
        let mut parser = TagParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.push(chunk));
        }
        events.extend(parser.finish());
        events
    }

    fn text_of(events: &[ParseEvent], role: TextRole) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Text { role: r, chunk } if *r == role => Some(chunk.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_is_response() {
        let events = collect(&["hello ", "world"]);
        assert_eq!(text_of(&events, TextRole::Response), "hello world");
    }

    #[test]
    fn thinking_section_switches_role() {
        let events = collect(&["[THINKING]let me see[/THINKING][RESPONSE]the answer"]);
        assert_eq!(text_of(&events, TextRole::Thinking), "let me see");
        assert_eq!(text_of(&events, TextRole::Response), "the answer");
    }

    #[test]
    fn tag_split_across_chunks_is_held() {
        let events = collect(&["before [THIN", "KING]inside[/THINK", "ING]after"]);
        assert_eq!(text_of(&events, TextRole::Response), "before after");
        assert_eq!(text_of(&events, TextRole::Thinking), "inside");
    }

    #[test]
    fn bracket_that_is_not_a_tag_is_text() {
        let events = collect(&["array[0] = [1, 2]"]);
        assert_eq!(text_of(&events, TextRole::Response), "array[0] = [1, 2]");
    }

    #[test]
    fn summary_is_buffered_and_emitted_once() {
        let events = collect(&["done. [SUMM", "ARY]fixed the bug[/SUM", "MARY] bye"]);
        assert!(events.contains(&ParseEvent::Summary { text: "fixed the bug".into() }));
        assert_eq!(text_of(&events, TextRole::Response), "done.  bye");
    }

    #[test]
    fn plan_body_is_captured_verbatim() {
        let events = collect(&["[PLAN]\n## Workflow: demo\n### Step 1: x\n[/PLAN]"]);
        match &events[0] {
            ParseEvent::Plan { text } => {
                assert!(text.contains("## Workflow: demo"));
                assert!(text.contains("### Step 1: x"));
            }
            other => panic!("expected plan event, got {other:?}"),
        }
    }

    #[test]
    fn file_read_op() {
        let events = collect(&["[FILE_READ] path: ./src/main.rs [/FILE_READ]"]);
        assert_eq!(
            events,
            vec![ParseEvent::FileOp {
                op: FileOperation::Read { path: "./src/main.rs".into() }
            }]
        );
    }

    #[test]
    fn file_write_op_with_fenced_content() {
        let body = "[FILE_WRITE] path: out.txt content: ```\nline one\nline two\n``` [/FILE_WRITE]";
        let events = collect(&[body]);
        assert_eq!(
            events,
            vec![ParseEvent::FileOp {
                op: FileOperation::Write {
                    path: "out.txt".into(),
                    content: "line one\nline two\n".into()
                }
            }]
        );
    }

    #[test]
    fn file_edit_op_with_pipe_blocks() {
        let body = "[FILE_EDIT] path: a.py\nfind: |\nold line\nreplace: |\nnew line\n[/FILE_EDIT]";
        let events = collect(&[body]);
        assert_eq!(
            events,
            vec![ParseEvent::FileOp {
                op: FileOperation::Edit {
                    path: "a.py".into(),
                    find: "old line".into(),
                    replace: "new line".into()
                }
            }]
        );
    }

    #[test]
    fn malformed_file_op_falls_back_to_text() {
        let events = collect(&["[FILE_READ] no path here [/FILE_READ]"]);
        assert_eq!(events.len(), 1);
        assert!(text_of(&events, TextRole::Response).contains("[FILE_READ]"));
    }

    #[test]
    fn unterminated_buffered_tag_flushes_as_text() {
        let events = collect(&["[SUMMARY]never closed"]);
        assert_eq!(
            text_of(&events, TextRole::Response),
            "[SUMMARY]never closed"
        );
    }

    #[test]
    fn incremental_equals_batch() {
        let full = "pre [THINKING]t1 [x] t2[/THINKING][RESPONSE]mid [SUMMARY]s[/SUMMARY] \
                    [FILE_READ] path: f.txt [/FILE_READ] post";
        let batch = collect(&[full]);

        // Re-feed one byte at a time.
        let mut parser = TagParser::new();
        let mut incremental = Vec::new();
        let mut buf = [0u8; 4];
        for ch in full.chars() {
            incremental.extend(parser.push(ch.encode_utf8(&mut buf)));
        }
        incremental.extend(parser.finish());

        assert_eq!(
            text_of(&batch, TextRole::Response),
            text_of(&incremental, TextRole::Response)
        );
        assert_eq!(
            text_of(&batch, TextRole::Thinking),
            text_of(&incremental, TextRole::Thinking)
        );
        let non_text = |events: &[ParseEvent]| {
            events
                .iter()
                .filter(|e| !matches!(e, ParseEvent::Text { .. }))
                .cloned()
                .collect::<Vec<_>>()
        };
        assert_eq!(non_text(&batch), non_text(&incremental));
    }
}
