//! Fixed-size byte chunking with resumable cursors.

/// A window of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<'a> {
    pub text: &'a str,
    /// Where the next window starts, or `None` when this one reached the end.
    pub next_cursor: Option<usize>,
    /// Estimated pages left after this one.
    pub remaining_pages: usize,
}

/// Largest char boundary at or before `index`.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Up to `pages` consecutive chunks of `chunk_size` bytes starting at `cursor`.
///
/// Chunk ends are snapped back to char boundaries. A chunk always advances
/// by at least one character so paging terminates even with a tiny budget.
pub fn paginate(source: &str, cursor: usize, chunk_size: usize, pages: usize) -> Page<'_> {
    let start = floor_char_boundary(source, cursor);
    let mut end = start;
    for _ in 0..pages.max(1) {
        if end >= source.len() {
            break;
        }
        end = chunk_end(source, end, chunk_size);
    }

    let rest = source.len() - end;
    let (next_cursor, remaining_pages) = if rest == 0 {
        (None, 0)
    } else {
        (Some(end), rest.div_ceil(chunk_size.max(1)))
    };
    Page {
        text: &source[start..end],
        next_cursor,
        remaining_pages,
    }
}

fn chunk_end(source: &str, start: usize, chunk_size: usize) -> usize {
    let end = floor_char_boundary(source, start.saturating_add(chunk_size));
    if end > start {
        return end;
    }
    source[start..]
        .chars()
        .next()
        .map_or(source.len(), |c| start + c.len_utf8())
}

/// Cursor for a percentage position: `floor(len * percent / 100)`, clamped.
pub fn percent_cursor(source: &str, percent: f64) -> usize {
    let percent = if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let offset = (source.len() as f64 * percent / 100.0).floor() as usize;
    floor_char_boundary(source, offset)
}
