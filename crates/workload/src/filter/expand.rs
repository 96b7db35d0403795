//! Brace-expansion of URL patterns such as `http://{a,b}.example.com/{1..3}`.

use async_trait::async_trait;

use super::{FilterOutcome, FilterStage};
use crate::random::RandomSource;
use crate::template::CandidateRequest;

/// Rewrites the candidate URL to one expansion of its brace pattern, chosen
/// uniformly at random.
#[derive(Debug, Clone, Default)]
pub struct ExpandUrl {
    rng: RandomSource,
}

impl ExpandUrl {
    pub fn new(rng: RandomSource) -> Self {
        Self { rng }
    }
}

#[async_trait]
impl FilterStage for ExpandUrl {
    fn name(&self) -> &str {
        "expand"
    }

    async fn evaluate(&self, candidate: &CandidateRequest) -> FilterOutcome {
        let mut urls = expand_braces(&candidate.url);
        if urls.len() == 1 && urls[0] == candidate.url {
            return FilterOutcome::Proceed;
        }
        let url = urls.swap_remove(self.rng.next_index(urls.len()));
        FilterOutcome::Replace(candidate.with_url(url))
    }
}

/// Upper bound on the strings one pattern expands to.
pub const MAX_EXPANSIONS: usize = 10_000;

/// Expand every brace group in `pattern`.
///
/// Supports comma lists (`{a,b}`, nested and with empty members), numeric
/// ranges with optional step and zero padding (`{1..9..2}`, `{01..10}`) and
/// single-letter ranges (`{a..e}`). Unbalanced braces, groups that are
/// neither a list nor a range, and ranges longer than [`MAX_EXPANSIONS`] are
/// kept literally. The result always holds at least one string and never
/// more than [`MAX_EXPANSIONS`].
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let bytes = pattern.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = pattern[search_from..].find('{') {
        let open = search_from + offset;
        let Some(close) = matching_brace(bytes, open) else {
            search_from = open + 1;
            continue;
        };

        let body = &pattern[open + 1..close];
        let alternatives = match split_top_level(body) {
            Some(parts) => parts
                .into_iter()
                .flat_map(expand_braces)
                .take(MAX_EXPANSIONS)
                .collect(),
            None => match sequence(body) {
                Some(values) => values,
                None => {
                    search_from = open + 1;
                    continue;
                }
            },
        };

        let prefix = &pattern[..open];
        let suffixes = expand_braces(&pattern[close + 1..]);
        return alternatives
            .iter()
            .flat_map(|alt| {
                suffixes
                    .iter()
                    .map(move |suffix| format!("{}{}{}", prefix, alt, suffix))
            })
            .take(MAX_EXPANSIONS)
            .collect();
    }

    vec![pattern.to_string()]
}

/// Index of the `}` that closes the `{` at `open`.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas outside nested braces. `None` when there is no such comma.
fn split_top_level(body: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, b) in body.bytes().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if parts.is_empty() {
        return None;
    }
    parts.push(&body[start..]);
    Some(parts)
}

/// Parse `start..end[..step]` into the values it denotes.
fn sequence(body: &str) -> Option<Vec<String>> {
    let fields: Vec<&str> = body.split("..").collect();
    let (start, end, step) = match fields.as_slice() {
        [start, end] => (*start, *end, None),
        [start, end, step] => (*start, *end, Some(step.parse::<i64>().ok()?)),
        _ => return None,
    };
    let step = step.map(i64::unsigned_abs).unwrap_or(1).max(1);

    if let (Ok(a), Ok(b)) = (start.parse::<i64>(), end.parse::<i64>()) {
        let width = if is_padded(start) || is_padded(end) {
            start.len().max(end.len())
        } else {
            0
        };
        return Some(
            stepped(a, b, step)?
                .into_iter()
                .map(|n| pad(n, width))
                .collect(),
        );
    }

    let (mut a, mut b) = (start.chars(), end.chars());
    match (a.next(), a.next(), b.next(), b.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => Some(
            stepped(a as i64, b as i64, step)?
                .into_iter()
                .filter_map(|c| char::from_u32(c as u32))
                .map(String::from)
                .collect(),
        ),
        _ => None,
    }
}

/// Values from `a` towards `b` in increments of `step`, or `None` when there
/// would be more than [`MAX_EXPANSIONS`] of them.
fn stepped(a: i64, b: i64, step: u64) -> Option<Vec<i64>> {
    let count = (a as i128 - b as i128).unsigned_abs() / step as u128 + 1;
    if count > MAX_EXPANSIONS as u128 {
        return None;
    }

    let mut out = Vec::with_capacity(count as usize);
    let mut next = Some(a);
    while let Some(n) = next {
        if (a <= b && n > b) || (a > b && n < b) {
            break;
        }
        out.push(n);
        next = if a <= b {
            n.checked_add_unsigned(step)
        } else {
            n.checked_sub_unsigned(step)
        };
    }
    Some(out)
}

fn is_padded(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    digits.len() > 1 && digits.starts_with('0')
}

fn pad(n: i64, width: usize) -> String {
    if n < 0 {
        format!("-{:0>w$}", n.unsigned_abs(), w = width.saturating_sub(1))
    } else {
        format!("{:0>w$}", n, w = width)
    }
}
