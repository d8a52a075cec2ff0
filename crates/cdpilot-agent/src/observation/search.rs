//! Keyword search with merged context windows.

use regex::RegexBuilder;

use crate::Result;

/// Matches of one term, rendered as context blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHits {
    pub text: String,
    pub matches: usize,
    pub blocks: usize,
}

/// Case-insensitive literal search for `term` in `source`.
///
/// Each match is widened by `context` characters on both sides; windows that
/// touch or overlap are merged into a single block. Returns `None` when the
/// term does not occur.
pub fn search(source: &str, term: &str, context: usize) -> Result<Option<SearchHits>> {
    let re = RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
        .map_err(|e| crate::Error::Config(format!("invalid search term: {}", e)))?;

    let mut windows: Vec<Window> = Vec::new();
    let mut matches = 0;
    for m in re.find_iter(source) {
        matches += 1;
        let start = back_chars(source, m.start(), context);
        let end = forward_chars(source, m.end(), context);
        match windows.last_mut() {
            Some(last) if start <= last.end => {
                last.end = last.end.max(end);
                last.matches += 1;
            }
            _ => windows.push(Window {
                start,
                end,
                first_match: m.start(),
                matches: 1,
            }),
        }
    }
    if windows.is_empty() {
        return Ok(None);
    }

    let blocks: Vec<String> = windows
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let offset = source[..w.first_match].chars().count();
            let hits = if w.matches > 1 {
                format!(" ({} matches)", w.matches)
            } else {
                String::new()
            };
            format!(
                "[MATCH {} @ {}{}]\n{}",
                i + 1,
                offset,
                hits,
                source[w.start..w.end].trim()
            )
        })
        .collect();

    Ok(Some(SearchHits {
        text: blocks.join("\n\n"),
        matches,
        blocks: windows.len(),
    }))
}

struct Window {
    start: usize,
    end: usize,
    first_match: usize,
    matches: usize,
}

fn back_chars(s: &str, byte: usize, n: usize) -> usize {
    if n == 0 {
        return byte;
    }
    s[..byte]
        .char_indices()
        .rev()
        .take(n)
        .last()
        .map_or(byte, |(i, _)| i)
}

fn forward_chars(s: &str, byte: usize, n: usize) -> usize {
    s[byte..]
        .char_indices()
        .nth(n)
        .map_or(s.len(), |(i, _)| byte + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_term_at(offsets: &[usize], len: usize) -> String {
        let mut doc = vec![b'.'; len];
        for &o in offsets {
            doc[o..o + 6].copy_from_slice(b"needle");
        }
        String::from_utf8(doc).unwrap()
    }

    #[test]
    fn test_distant_matches_give_two_blocks() {
        let doc = doc_with_term_at(&[50, 5000], 10_000);
        let hits = search(&doc, "needle", 100).unwrap().unwrap();
        assert_eq!(hits.matches, 2);
        assert_eq!(hits.blocks, 2);
        assert!(hits.text.contains("[MATCH 1 @ 50]"));
        assert!(hits.text.contains("[MATCH 2 @ 5000]"));
    }

    #[test]
    fn test_nearby_matches_merge_into_one_block() {
        let doc = doc_with_term_at(&[50, 120], 10_000);
        let hits = search(&doc, "needle", 100).unwrap().unwrap();
        assert_eq!(hits.matches, 2);
        assert_eq!(hits.blocks, 1);
        assert!(hits.text.starts_with("[MATCH 1 @ 50 (2 matches)]"));
        // Window spans from the document start to 100 chars past the second match
        let body = hits.text.lines().nth(1).unwrap();
        assert_eq!(body.len(), 126 + 100);
    }

    #[test]
    fn test_case_insensitive() {
        let hits = search("Sign In to continue", "sign in", 5).unwrap().unwrap();
        assert_eq!(hits.matches, 1);
        assert!(hits.text.contains("Sign In"));
    }

    #[test]
    fn test_term_is_literal_not_regex() {
        assert!(search("price: $5 (approx)", "(approx)", 10).unwrap().is_some());
        assert!(search("abc", "a.c", 10).unwrap().is_none());
    }

    #[test]
    fn test_no_match() {
        assert_eq!(search("nothing here", "missing", 100).unwrap(), None);
    }

    #[test]
    fn test_context_counts_characters_not_bytes() {
        let doc = format!("{}needle{}", "é".repeat(10), "ü".repeat(10));
        let hits = search(&doc, "needle", 3).unwrap().unwrap();
        assert!(hits.text.ends_with("éééneedleüüü"), "{}", hits.text);
        assert!(hits.text.contains("[MATCH 1 @ 10]"));
    }
}
