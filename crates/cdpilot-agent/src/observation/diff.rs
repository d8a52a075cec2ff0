//! Word-level diff between two page observations.
//!
//! Text is split into alternating runs of whitespace and non-whitespace, so
//! concatenating the unchanged and added runs of a diff rebuilds the new text
//! byte for byte (and unchanged plus removed rebuilds the old one).

use crate::config::ObservationConfig;

/// Edit distance (in tokens) past which the changed middle is reported as
/// one removal followed by one addition.
const MAX_EDIT_DISTANCE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Unchanged,
    Added,
    Removed,
}

/// One run of the diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub text: String,
}

/// Diff `old` against `new` at word granularity.
pub fn diff_words(old: &str, new: &str) -> Vec<Change> {
    let a = tokenize(old);
    let b = tokenize(new);

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut out = Changes::default();
    for t in &a[..prefix] {
        out.push(ChangeKind::Unchanged, t);
    }
    match shortest_edit(a_mid, b_mid, MAX_EDIT_DISTANCE) {
        Some(trace) => {
            for (kind, t) in backtrack(&trace, a_mid, b_mid) {
                out.push(kind, t);
            }
        }
        None => {
            for t in a_mid {
                out.push(ChangeKind::Removed, t);
            }
            for t in b_mid {
                out.push(ChangeKind::Added, t);
            }
        }
    }
    for t in &a[a.len() - suffix..] {
        out.push(ChangeKind::Unchanged, t);
    }
    out.0
}

/// Render changed runs as `[ADDED] ...` / `[REMOVED] ...` lines.
///
/// Whitespace inside a run is collapsed to single spaces; runs that only
/// changed whitespace produce no line.
pub fn format_diff(changes: &[Change]) -> String {
    let mut lines = Vec::new();
    for change in changes {
        let prefix = match change.kind {
            ChangeKind::Unchanged => continue,
            ChangeKind::Added => "[ADDED]",
            ChangeKind::Removed => "[REMOVED]",
        };
        let words: Vec<&str> = change.text.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        lines.push(format!("{} {}", prefix, words.join(" ")));
    }
    lines.join("\n")
}

/// Whether a formatted diff is churn rather than content: mostly numeric
/// changes (counters, clocks), or many tiny fragments.
pub fn is_noise(formatted: &str, config: &ObservationConfig) -> bool {
    let contents: Vec<&str> = formatted.lines().map(line_content).collect();
    if contents.is_empty() {
        return false;
    }

    let numeric = contents.iter().filter(|c| is_numeric_only(c)).count();
    if numeric as f64 / contents.len() as f64 > config.numeric_churn_ratio {
        return true;
    }

    contents.len() > config.fragment_min_lines
        && contents
            .iter()
            .all(|c| c.chars().count() < config.fragment_max_line_len)
}

fn line_content(line: &str) -> &str {
    line.strip_prefix("[ADDED] ")
        .or_else(|| line.strip_prefix("[REMOVED] "))
        .unwrap_or(line)
}

/// Digits plus separators only, with at least one digit (`12:04`, `1,234`, `-3`).
fn is_numeric_only(content: &str) -> bool {
    content.chars().any(|c| c.is_ascii_digit())
        && content
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || c.is_ascii_punctuation())
}

fn tokenize(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut prev_ws = None;
    for (i, c) in s.char_indices() {
        let ws = c.is_whitespace();
        if prev_ws.is_some_and(|p| p != ws) {
            tokens.push(&s[start..i]);
            start = i;
        }
        prev_ws = Some(ws);
    }
    if start < s.len() {
        tokens.push(&s[start..]);
    }
    tokens
}

#[derive(Default)]
struct Changes(Vec<Change>);

impl Changes {
    fn push(&mut self, kind: ChangeKind, text: &str) {
        match self.0.last_mut() {
            Some(last) if last.kind == kind => last.text.push_str(text),
            _ => self.0.push(Change {
                kind,
                text: text.to_string(),
            }),
        }
    }
}

/// Myers' greedy forward pass. Returns, per round `d`, the furthest-reaching
/// x for diagonals `-d..=d` as they stood before that round, or `None` when
/// the edit distance exceeds `max_d`.
fn shortest_edit(a: &[&str], b: &[&str], max_d: usize) -> Option<Vec<Vec<isize>>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = a.len() + b.len();
    let offset = max as isize + 1;
    let mut v = vec![0isize; 2 * max + 3];
    let mut trace = Vec::new();

    for d in 0..=max.min(max_d) as isize {
        trace.push(v[(offset - d) as usize..=(offset + d) as usize].to_vec());
        let mut k = -d;
        while k <= d {
            let i = (offset + k) as usize;
            let mut x = if k == -d || (k != d && v[i - 1] < v[i + 1]) {
                v[i + 1]
            } else {
                v[i - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[i] = x;
            if x >= n && y >= m {
                return Some(trace);
            }
            k += 2;
        }
    }
    None
}

fn backtrack<'a>(
    trace: &[Vec<isize>],
    a: &[&'a str],
    b: &[&'a str],
) -> Vec<(ChangeKind, &'a str)> {
    let mut x = a.len() as isize;
    let mut y = b.len() as isize;
    let mut ops = Vec::new();

    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        if d == 0 {
            while x > 0 && y > 0 {
                ops.push((ChangeKind::Unchanged, a[(x - 1) as usize]));
                x -= 1;
                y -= 1;
            }
            break;
        }

        let at = |k: isize| v[(k + d) as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && at(k - 1) < at(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = at(prev_k);
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            ops.push((ChangeKind::Unchanged, a[(x - 1) as usize]));
            x -= 1;
            y -= 1;
        }
        if x == prev_x {
            ops.push((ChangeKind::Added, b[prev_y as usize]));
        } else {
            ops.push((ChangeKind::Removed, a[prev_x as usize]));
        }
        x = prev_x;
        y = prev_y;
    }

    ops.reverse();
    ops
}
