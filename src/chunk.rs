use std::io::Write as _;

use anyhow::Context as _;

use crate::cli::ChunkArgs;

pub const DEFAULT_MAX_CHARS: usize = 3200;

pub fn run(args: ChunkArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("read text file: {}", args.file))?;
    let chunks = chunk_text(&text, args.max_chars);
    tracing::debug!(chunks = chunks.len(), "chunked text");

    let mut stdout = std::io::stdout().lock();
    for (idx, chunk) in chunks.iter().enumerate() {
        if idx > 0 {
            stdout.write_all(b"\n").context("write separator")?;
        }
        writeln!(stdout, "{chunk}").context("write chunk")?;
    }
    Ok(())
}

/// Splits text into pieces of at most `max_chars` characters for one synthesis
/// call each.
///
/// Sentences are never cut: a single sentence longer than `max_chars` becomes
/// an oversized chunk of its own. Paragraph breaks always end a sentence, so
/// no sentence spans two paragraphs.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0_usize;

    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        for sentence in split_sentences(paragraph) {
            let sentence_chars = sentence.chars().count();
            if buf_chars > 0 && buf_chars + 1 + sentence_chars > max_chars {
                chunks.push(std::mem::take(&mut buf));
                buf_chars = 0;
            }
            if buf_chars > 0 {
                buf.push(' ');
                buf_chars += 1;
            }
            buf.push_str(sentence);
            buf_chars += sentence_chars;
        }
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// Splits after `.`, `!` or `?` when followed by whitespace. The whitespace
/// run is dropped; the terminator stays with its sentence.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            let sentence = &paragraph[start..idx];
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            let mut next_start = idx + ch.len_utf8();
            while let Some(&(ws_idx, ws)) = chars.peek() {
                if !ws.is_whitespace() {
                    break;
                }
                next_start = ws_idx + ws.len_utf8();
                chars.next();
            }
            start = next_start;
            prev = None;
            continue;
        }
        prev = Some(ch);
    }

    let rest = &paragraph[start..];
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminators_followed_by_whitespace() {
        assert_eq!(
            split_sentences("One. Two!  Three? Four...five. e.g.x"),
            vec!["One.", "Two!", "Three?", "Four...five.", "e.g.x"]
        );
    }

    #[test]
    fn short_text_is_one_chunk_joining_paragraphs() {
        let text = "First line. Still first.\n\n  \nSecond paragraph.\n";
        assert_eq!(
            chunk_text(text, 3200),
            vec!["First line. Still first. Second paragraph."]
        );
    }

    #[test]
    fn empty_and_blank_input_yield_no_chunks() {
        assert!(chunk_text("", 10).is_empty());
        assert!(chunk_text(" \n\t\n", 10).is_empty());
    }

    #[test]
    fn flushes_before_exceeding_limit() {
        let text = "aaaa. bbbb. cccc.";
        // "aaaa. bbbb." is 11 chars; adding " cccc." would make 17.
        assert_eq!(chunk_text(text, 12), vec!["aaaa. bbbb.", "cccc."]);
        assert_eq!(chunk_text(text, 17), vec!["aaaa. bbbb. cccc."]);
        assert_eq!(chunk_text(text, 16), vec!["aaaa. bbbb.", "cccc."]);
    }

    #[test]
    fn oversized_sentence_is_kept_whole() {
        let long = "x".repeat(50);
        let text = format!("Hi. {long}. Bye.");
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks, vec!["Hi.".to_owned(), format!("{long}."), "Bye.".to_owned()]);
    }

    #[test]
    fn chunks_respect_limit_and_preserve_sentence_order() {
        let text = (1..=200)
            .map(|i| format!("Sentence number {i} is here."))
            .collect::<Vec<_>>()
            .chunks(7)
            .map(|para| para.join(" "))
            .collect::<Vec<_>>()
            .join("\n\n");

        let chunks = chunk_text(&text, 120);
        assert!(chunks.iter().all(|c| c.chars().count() <= 120));

        let rejoined = chunks.join(" ");
        let expected = text.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(rejoined, expected);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "日本語です. もう一つ.";
        assert_eq!(chunk_text(text, 12), vec!["日本語です. もう一つ."]);
        assert_eq!(chunk_text(text, 11), vec!["日本語です.", "もう一つ."]);
    }
}
