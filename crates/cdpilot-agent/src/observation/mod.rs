//! Observation cache and the diff/paginate protocol behind `get_page_info`.
//!
//! The cache holds the page text from the previous query. Each fresh query
//! diffs against it, picks the diff or the full text, replaces the cached
//! text, and serves the chosen payload in fixed-size chunks. Continuation
//! requests (a non-zero cursor into the same payload) are served from the
//! stored payload without re-perceiving the page.

pub mod diff;
pub mod paginate;
pub mod search;

use std::fmt;

use tracing::debug;

use crate::config::ObservationConfig;
use crate::Result;

const NO_CHANGES: &str = "No changes since the previous observation.";

/// Caller options for one page-info query.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfoRequest {
    /// Return the full text even if a diff is available.
    pub force: bool,
    /// Byte offset into the payload.
    pub cursor: usize,
    /// Chunks to return in this response (at least one).
    pub remaining_pages: usize,
    /// Narrow the full text to case-insensitive keyword matches.
    pub search: Option<String>,
    /// Jump to `floor(len * percent / 100)` of the full text.
    pub percent: Option<f64>,
}

impl Default for PageInfoRequest {
    fn default() -> Self {
        Self {
            force: false,
            cursor: 0,
            remaining_pages: 1,
            search: None,
            percent: None,
        }
    }
}

impl PageInfoRequest {
    fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Where a chunk's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Full,
    Diff,
    Search,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Full => write!(f, "full"),
            Source::Diff => write!(f, "diff"),
            Source::Search => write!(f, "search"),
        }
    }
}

/// One response window over a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChunk {
    pub content: String,
    pub source: Source,
    /// Cursor for the next request, `None` at end of content.
    pub next_cursor: Option<usize>,
    pub remaining_pages_estimate: usize,
    /// Byte length of the whole payload.
    pub total_len: usize,
}

impl fmt::Display for PageChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Source::Full => {}
            Source::Diff => writeln!(f, "[CHANGES SINCE LAST OBSERVATION]")?,
            Source::Search => writeln!(f, "[SEARCH RESULTS]")?,
        }
        if !self.content.is_empty() {
            writeln!(f, "{}", self.content)?;
            writeln!(f)?;
        }
        match self.next_cursor {
            Some(next) => write!(
                f,
                "[NEXT CURSOR: {} | ~{} more page(s)]",
                next, self.remaining_pages_estimate
            ),
            None => write!(f, "[END OF CONTENT]"),
        }
    }
}

/// Result of a page-info query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageInfo {
    Chunk(PageChunk),
    /// Keyword search found nothing. Distinct from an empty chunk.
    NoMatch { term: String },
}

impl PageInfo {
    pub fn chunk(&self) -> Option<&PageChunk> {
        match self {
            PageInfo::Chunk(chunk) => Some(chunk),
            PageInfo::NoMatch { .. } => None,
        }
    }
}

impl fmt::Display for PageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageInfo::Chunk(chunk) => chunk.fmt(f),
            PageInfo::NoMatch { term } => write!(f, "No matches found for \"{}\".", term),
        }
    }
}

struct Payload {
    source: Source,
    text: String,
    search: Option<String>,
}

/// The single retained observation plus the payload being paged through.
pub struct ObservationCache {
    config: ObservationConfig,
    previous: Option<String>,
    payload: Option<Payload>,
}

impl ObservationCache {
    pub fn new(config: ObservationConfig) -> Self {
        Self {
            config,
            previous: None,
            payload: None,
        }
    }

    /// Replace the baseline without producing a response (e.g. after navigation).
    pub fn record(&mut self, text: String) {
        self.previous = Some(text);
        self.payload = None;
    }

    /// Forget everything; the next query returns the full text.
    pub fn clear(&mut self) {
        self.previous = None;
        self.payload = None;
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Serve a continuation request from the stored payload, if it is one.
    pub fn resume(&self, req: &PageInfoRequest) -> Option<PageInfo> {
        if req.force || req.cursor == 0 || req.percent.is_some() {
            return None;
        }
        let payload = self.payload.as_ref()?;
        if payload.search.as_deref() != req.search_term() {
            return None;
        }
        debug!(cursor = req.cursor, source = %payload.source, "Resuming stored payload");
        Some(PageInfo::Chunk(self.chunk(
            payload.source,
            &payload.text,
            req.cursor,
            req.remaining_pages,
        )))
    }

    /// Handle a fresh query against `current`, the just-rendered page text.
    pub fn observe(&mut self, current: String, req: &PageInfoRequest) -> Result<PageInfo> {
        let previous = self.previous.replace(current.clone());

        if let Some(percent) = req.percent {
            let cursor = paginate::percent_cursor(&current, percent);
            return Ok(self.serve(Source::Full, current, None, cursor, req));
        }

        if let Some(term) = req.search_term() {
            return match search::search(&current, term, self.config.search_context)? {
                Some(hits) => {
                    debug!(term, matches = hits.matches, blocks = hits.blocks, "Search hits");
                    Ok(self.serve(Source::Search, hits.text, Some(term.to_string()), req.cursor, req))
                }
                None => {
                    self.payload = None;
                    Ok(PageInfo::NoMatch {
                        term: term.to_string(),
                    })
                }
            };
        }

        let previous = match previous {
            Some(previous) if !req.force => previous,
            _ => return Ok(self.serve(Source::Full, current, None, req.cursor, req)),
        };

        let (source, text) = self.choose(&previous, current);
        Ok(self.serve(source, text, None, req.cursor, req))
    }

    /// Diff or full text, whichever is cheaper and meaningful.
    fn choose(&self, previous: &str, current: String) -> (Source, String) {
        let formatted = diff::format_diff(&diff::diff_words(previous, &current));
        if formatted.is_empty() {
            return (Source::Diff, NO_CHANGES.to_string());
        }
        if formatted.len() > current.len() {
            debug!(
                diff_len = formatted.len(),
                full_len = current.len(),
                "Diff larger than page, returning full text"
            );
            return (Source::Full, current);
        }
        if diff::is_noise(&formatted, &self.config) {
            debug!("Diff is churn, returning full text");
            return (Source::Full, current);
        }
        (Source::Diff, formatted)
    }

    fn serve(
        &mut self,
        source: Source,
        text: String,
        search: Option<String>,
        cursor: usize,
        req: &PageInfoRequest,
    ) -> PageInfo {
        let chunk = self.chunk(source, &text, cursor, req.remaining_pages);
        self.payload = Some(Payload {
            source,
            text,
            search,
        });
        PageInfo::Chunk(chunk)
    }

    fn chunk(&self, source: Source, text: &str, cursor: usize, pages: usize) -> PageChunk {
        let page = paginate::paginate(text, cursor, self.config.chunk_size, pages);
        PageChunk {
            content: page.text.to_string(),
            source,
            next_cursor: page.next_cursor,
            remaining_pages_estimate: page.remaining_pages,
            total_len: text.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ObservationCache {
        ObservationCache::new(ObservationConfig::default())
    }

    fn chunk(info: PageInfo) -> PageChunk {
        match info {
            PageInfo::Chunk(chunk) => chunk,
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    const PAGE: &str = "[0]{link}(Home) [1]{link}(Docs)\n\nWelcome to the docs portal\n\n\
        Getting started guide with installation steps and examples\n\n[2]{button}(Sign in)";

    #[test]
    fn test_first_query_returns_full_text() {
        let mut cache = cache();
        let c = chunk(cache.observe(PAGE.into(), &PageInfoRequest::default()).unwrap());
        assert_eq!(c.source, Source::Full);
        assert_eq!(c.content, PAGE);
        assert_eq!(c.next_cursor, None);
        assert!(cache.has_baseline());
    }

    #[test]
    fn test_second_query_returns_diff() {
        let mut cache = cache();
        cache.observe(PAGE.into(), &PageInfoRequest::default()).unwrap();
        let next = PAGE.replace("Sign in", "Sign out");
        let c = chunk(cache.observe(next, &PageInfoRequest::default()).unwrap());
        assert_eq!(c.source, Source::Diff);
        assert!(c.content.contains("[REMOVED] in"));
        assert!(c.content.contains("[ADDED] out"));
        assert!(!c.content.contains("Welcome"));
    }

    #[test]
    fn test_unchanged_page_reports_no_changes() {
        let mut cache = cache();
        cache.observe(PAGE.into(), &PageInfoRequest::default()).unwrap();
        let c = chunk(cache.observe(PAGE.into(), &PageInfoRequest::default()).unwrap());
        assert_eq!(c.source, Source::Diff);
        assert_eq!(c.content, NO_CHANGES);
    }

    #[test]
    fn test_diff_longer_than_page_falls_back_to_full() {
        let mut cache = cache();
        let long: String = (0..200).map(|i| format!("paragraph {} ", i)).collect();
        cache.observe(long, &PageInfoRequest::default()).unwrap();
        let c = chunk(cache.observe("Done".into(), &PageInfoRequest::default()).unwrap());
        assert_eq!(c.source, Source::Full);
        assert_eq!(c.content, "Done");
    }

    #[test]
    fn test_numeric_churn_falls_back_to_full() {
        let mut cache = cache();
        let page = |n: u32| format!("{}\n\nServer time 12:00:{:02}", PAGE, n);
        cache.observe(page(1), &PageInfoRequest::default()).unwrap();
        let c = chunk(cache.observe(page(2), &PageInfoRequest::default()).unwrap());
        assert_eq!(c.source, Source::Full);
    }

    #[test]
    fn test_force_returns_full_and_still_replaces_baseline() {
        let mut cache = cache();
        cache.observe("old text".into(), &PageInfoRequest::default()).unwrap();
        let req = PageInfoRequest {
            force: true,
            ..Default::default()
        };
        let c = chunk(cache.observe(PAGE.into(), &req).unwrap());
        assert_eq!(c.source, Source::Full);
        let c = chunk(cache.observe(PAGE.into(), &PageInfoRequest::default()).unwrap());
        assert_eq!(c.content, NO_CHANGES);
    }

    #[test]
    fn test_search_no_match_is_explicit() {
        let mut cache = cache();
        let req = PageInfoRequest {
            search: Some("checkout".into()),
            ..Default::default()
        };
        let info = cache.observe(PAGE.into(), &req).unwrap();
        assert_eq!(
            info,
            PageInfo::NoMatch {
                term: "checkout".into()
            }
        );
        assert_eq!(info.to_string(), "No matches found for \"checkout\".");
    }

    #[test]
    fn test_search_hits() {
        let mut cache = cache();
        let req = PageInfoRequest {
            search: Some("SIGN IN".into()),
            ..Default::default()
        };
        let c = chunk(cache.observe(PAGE.into(), &req).unwrap());
        assert_eq!(c.source, Source::Search);
        assert!(c.content.contains("[2]{button}(Sign in)"));
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let mut cache = cache();
        let req = PageInfoRequest {
            search: Some("  ".into()),
            ..Default::default()
        };
        let c = chunk(cache.observe(PAGE.into(), &req).unwrap());
        assert_eq!(c.source, Source::Full);
    }

    #[test]
    fn test_percent_jumps_into_full_text() {
        let mut cache = cache();
        cache.observe("earlier".into(), &PageInfoRequest::default()).unwrap();
        let text = "x".repeat(400);
        let req = PageInfoRequest {
            percent: Some(50.0),
            ..Default::default()
        };
        let c = chunk(cache.observe(text, &req).unwrap());
        assert_eq!(c.source, Source::Full);
        assert_eq!(c.content.len(), 200);
        assert_eq!(c.total_len, 400);
    }

    #[test]
    fn test_following_cursors_covers_payload_exactly_once() {
        let mut cache = ObservationCache::new(ObservationConfig {
            chunk_size: 64,
            ..ObservationConfig::default()
        });
        let text: String = (0..40).map(|i| format!("row {} of the table\n", i)).collect();

        let mut req = PageInfoRequest::default();
        let mut first = chunk(cache.observe(text.clone(), &req).unwrap());
        let mut joined = first.content.clone();
        while let Some(next) = first.next_cursor {
            req.cursor = next;
            first = chunk(cache.resume(&req).expect("continuation served from payload"));
            joined.push_str(&first.content);
        }
        assert_eq!(joined, text);
    }

    #[test]
    fn test_resume_requires_matching_payload() {
        let mut cache = cache();
        let req = PageInfoRequest {
            cursor: 10,
            ..Default::default()
        };
        assert!(cache.resume(&req).is_none());

        cache.observe(PAGE.into(), &PageInfoRequest::default()).unwrap();
        assert!(cache.resume(&req).is_some());

        let other_search = PageInfoRequest {
            cursor: 10,
            search: Some("docs".into()),
            ..Default::default()
        };
        assert!(cache.resume(&other_search).is_none());
    }

    #[test]
    fn test_chunk_display_markers() {
        let done = PageChunk {
            content: "hello".into(),
            source: Source::Full,
            next_cursor: None,
            remaining_pages_estimate: 0,
            total_len: 5,
        };
        assert_eq!(done.to_string(), "hello\n\n[END OF CONTENT]");

        let more = PageChunk {
            next_cursor: Some(10240),
            remaining_pages_estimate: 2,
            source: Source::Diff,
            ..done
        };
        assert_eq!(
            more.to_string(),
            "[CHANGES SINCE LAST OBSERVATION]\nhello\n\n[NEXT CURSOR: 10240 | ~2 more page(s)]"
        );
    }
}
