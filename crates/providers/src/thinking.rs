//! Splitting `<thinking>` blocks out of raw model output.

pub const TRUNCATED_ANSWER: &str =
    "[AI response seems to be a thinking process only or was truncated.]";
pub const REASONING_ONLY_ANSWER: &str =
    "[AI response primarily contained reasoning. See thinking process for details.]";
pub const EMPTY_ANSWER: &str = "[AI provided an empty response.]";

const OPEN: &str = "<thinking>";
const CLOSE: &str = "</thinking>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub answer: String,
    pub thinking: Option<String>,
}

/// Separate the first `<thinking>…</thinking>` block (case-insensitive) from
/// the answer.
///
/// An unterminated block makes everything after the opening tag thinking and
/// yields a placeholder answer. Empty output also yields a placeholder.
pub fn parse_thinking(raw: &str) -> ParsedReply {
    let lower = raw.to_ascii_lowercase();

    let Some(start) = lower.find(OPEN) else {
        let answer = raw.trim();
        return ParsedReply {
            answer: if answer.is_empty() { EMPTY_ANSWER.into() } else { answer.into() },
            thinking: None,
        };
    };

    let body_start = start + OPEN.len();
    match lower[body_start..].find(CLOSE) {
        Some(rel_end) => {
            let end = body_start + rel_end;
            let thinking = raw[body_start..end].trim().to_string();
            let answer = format!("{}{}", &raw[..start], &raw[end + CLOSE.len()..])
                .trim()
                .to_string();
            let thinking = (!thinking.is_empty()).then_some(thinking);
            let answer = if !answer.is_empty() {
                answer
            } else if thinking.is_some() {
                REASONING_ONLY_ANSWER.into()
            } else {
                EMPTY_ANSWER.into()
            };
            ParsedReply { answer, thinking }
        }
        None => {
            let thinking = raw[body_start..].trim().to_string();
            ParsedReply {
                answer: TRUNCATED_ANSWER.into(),
                thinking: (!thinking.is_empty()).then_some(thinking),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_answer_passes_through() {
        let parsed = parse_thinking("  The answer is 4. ");
        assert_eq!(parsed.answer, "The answer is 4.");
        assert!(parsed.thinking.is_none());
    }

    #[test]
    fn block_is_split_from_answer() {
        let parsed = parse_thinking("<thinking>2 + 2 = 4</thinking>\nThe answer is 4.");
        assert_eq!(parsed.answer, "The answer is 4.");
        assert_eq!(parsed.thinking.as_deref(), Some("2 + 2 = 4"));
    }

    #[test]
    fn tags_are_case_insensitive() {
        let parsed = parse_thinking("<THINKING>hmm</Thinking>ok");
        assert_eq!(parsed.answer, "ok");
        assert_eq!(parsed.thinking.as_deref(), Some("hmm"));
    }

    #[test]
    fn unterminated_block_is_all_thinking() {
        let parsed = parse_thinking("<thinking>step one, step two");
        assert_eq!(parsed.answer, TRUNCATED_ANSWER);
        assert_eq!(parsed.thinking.as_deref(), Some("step one, step two"));
    }

    #[test]
    fn reasoning_without_answer_gets_placeholder() {
        let parsed = parse_thinking("<thinking>only reasoning</thinking>   ");
        assert_eq!(parsed.answer, REASONING_ONLY_ANSWER);
        assert_eq!(parsed.thinking.as_deref(), Some("only reasoning"));
    }

    #[test]
    fn empty_output_gets_placeholder() {
        assert_eq!(parse_thinking("").answer, EMPTY_ANSWER);
        assert_eq!(parse_thinking("<thinking></thinking>").answer, EMPTY_ANSWER);
    }
}
