use crate::models::{NormalizedText, Segment, SegmentMetadata};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkingConfig {
    /// Also split at blank-line paragraph breaks, not only at headings.
    pub split_paragraphs: bool,
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
struct Heading {
    offset: usize,
    level: usize,
    title: String,
}

/// Splits normalized text at markdown structure. Segments are contiguous
/// slices of the input, so concatenating them in order yields the input.
pub fn split_markdown(document: &NormalizedText, config: ChunkingConfig) -> Vec<Segment> {
    let text = document.text.as_str();
    if text.is_empty() {
        return Vec::new();
    }

    let (boundaries, headings) = scan_structure(text, config);
    let ranges = merge_blank_ranges(text, &boundaries);

    let mut segments = Vec::with_capacity(ranges.len());
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut pending = headings.iter().peekable();

    for (index, (start, end)) in ranges.into_iter().enumerate() {
        let slice = &text[start..end];
        let content_at = start + (slice.len() - slice.trim_start().len());

        while let Some(heading) = pending.next_if(|heading| heading.offset <= content_at) {
            while stack.last().is_some_and(|(level, _)| *level >= heading.level) {
                stack.pop();
            }
            stack.push((heading.level, heading.title.clone()));
        }

        segments.push(Segment {
            segment_id: make_segment_id(&document.source.name, start, slice),
            text: slice.to_string(),
            metadata: SegmentMetadata {
                source: document.source.clone(),
                header_path: header_path(&stack),
                segment_index: index as u64,
                start,
                end,
            },
        });
    }

    segments
}

fn scan_structure(text: &str, config: ChunkingConfig) -> (Vec<usize>, Vec<Heading>) {
    let mut boundaries = vec![0];
    let mut headings = Vec::new();
    let mut in_fence = false;
    let mut after_blank = false;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            if !in_fence && after_blank && config.split_paragraphs {
                boundaries.push(offset);
            }
            in_fence = !in_fence;
            after_blank = false;
        } else if in_fence {
            // fenced content is opaque
        } else if trimmed.is_empty() {
            after_blank = true;
        } else {
            if let Some((level, title)) = parse_heading(trimmed) {
                boundaries.push(offset);
                headings.push(Heading {
                    offset,
                    level,
                    title,
                });
            } else if after_blank && config.split_paragraphs {
                boundaries.push(offset);
            }
            after_blank = false;
        }

        offset += line.len();
    }

    boundaries.push(text.len());
    boundaries.sort_unstable();
    boundaries.dedup();
    (boundaries, headings)
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let level = line.chars().take_while(|ch| *ch == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }

    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }

    Some((level, rest.trim().trim_end_matches('#').trim().to_string()))
}

/// Turns boundary offsets into ranges, folding whitespace-only ranges into
/// the following range (or the previous one at the end of the text).
fn merge_blank_ranges(text: &str, boundaries: &[usize]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut carry: Option<usize> = None;

    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        if text[start..end].trim().is_empty() {
            carry.get_or_insert(start);
            continue;
        }
        ranges.push((carry.take().unwrap_or(start), end));
    }

    if let Some(start) = carry {
        match ranges.last_mut() {
            Some(last) => last.1 = text.len(),
            None => ranges.push((start, text.len())),
        }
    }

    ranges
}

fn header_path(stack: &[(usize, String)]) -> String {
    let mut path = String::from("/");
    for (_, title) in stack {
        path.push_str(title);
        path.push('/');
    }
    path
}

fn make_segment_id(source: &str, start: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update((start as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
