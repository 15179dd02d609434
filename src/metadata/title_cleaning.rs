//! Annotation stripping shared by every metadata tier.

const MAX_CLEANING_PASSES: usize = 8;

const ANNOTATION_LEADING_WORDS: [&str; 5] = ["feat", "ft", "featuring", "with", "prod"];

const ANNOTATION_WORDS: [&str; 16] = [
    "official",
    "video",
    "audio",
    "lyric",
    "lyrics",
    "live",
    "remaster",
    "remastered",
    "hd",
    "hq",
    "4k",
    "1080p",
    "720p",
    "visualizer",
    "explicit",
    "mv",
];

const INLINE_CREDIT_MARKERS: [&str; 5] = [" feat. ", " feat ", " ft. ", " ft ", " featuring "];

const TRAILING_ANNOTATION_PHRASES: [&str; 14] = [
    "official music video",
    "official lyric video",
    "official video",
    "official audio",
    "lyric video",
    "lyrics video",
    "music video",
    "audio only",
    "lyrics",
    "remastered",
    "visualizer",
    "1080p",
    "4k",
    "hd",
];

const TRAILING_SEPARATORS: [char; 8] = [' ', '-', '|', '/', ':', '–', '—', ','];

/// Applies `step` until it stops changing the value. Every step only removes
/// text, so this terminates.
fn until_stable(value: &str, step: fn(&str) -> String) -> String {
    let mut current = value.to_string();
    loop {
        let next = step(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn closing_for(opener: char) -> char {
    match opener {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_year_like(token: &str) -> bool {
    token.len() == 4
        && token.chars().all(|ch| ch.is_ascii_digit())
        && (token.starts_with("19") || token.starts_with("20"))
}

fn is_annotation_group(inner: &str) -> bool {
    let lowered = inner.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    let Some(first) = tokens.first() else {
        return true;
    };
    ANNOTATION_LEADING_WORDS.contains(first)
        || tokens.iter().any(|token| ANNOTATION_WORDS.contains(token))
        || tokens.iter().any(|token| is_year_like(token))
}

/// Removes innermost `()`, `[]` and `{}` groups that hold an annotation.
fn strip_bracketed_annotations(value: &str) -> String {
    let mut doomed = Vec::new();
    let mut open: Option<(usize, char)> = None;
    for (index, ch) in value.char_indices() {
        match ch {
            '(' | '[' | '{' => open = Some((index, ch)),
            ')' | ']' | '}' => {
                if let Some((start, opener)) = open.take() {
                    if closing_for(opener) == ch && is_annotation_group(&value[start + 1..index]) {
                        doomed.push((start, index + ch.len_utf8()));
                    }
                }
            }
            _ => {}
        }
    }

    let mut cleaned = String::with_capacity(value.len());
    let mut cursor = 0;
    for (start, end) in doomed {
        cleaned.push_str(&value[cursor..start]);
        cleaned.push(' ');
        cursor = end;
    }
    cleaned.push_str(&value[cursor..]);
    cleaned
}

fn strip_inline_credit(value: &str) -> String {
    let lowered = value.to_ascii_lowercase();
    let cut = INLINE_CREDIT_MARKERS
        .iter()
        .filter_map(|marker| lowered.find(marker))
        .min();
    match cut {
        Some(index) => value[..index].to_string(),
        None => value.to_string(),
    }
}

fn strip_trailing_phrase(value: &str) -> String {
    let trimmed = value.trim_end_matches(TRAILING_SEPARATORS);
    let lowered = trimmed.to_ascii_lowercase();
    for phrase in TRAILING_ANNOTATION_PHRASES {
        let Some(head) = lowered.strip_suffix(phrase) else {
            continue;
        };
        let at_word_boundary = head
            .chars()
            .last()
            .map_or(true, |ch| TRAILING_SEPARATORS.contains(&ch));
        if at_word_boundary {
            return trimmed[..head.len()]
                .trim_end_matches(TRAILING_SEPARATORS)
                .to_string();
        }
    }
    trimmed.to_string()
}

fn cleaning_pass(value: &str) -> String {
    let stripped = until_stable(value, strip_bracketed_annotations);
    let stripped = strip_inline_credit(&stripped);
    let stripped = until_stable(&stripped, strip_trailing_phrase);
    collapse_whitespace(&stripped)
}

/// Strips annotations until the title stops changing.
///
/// Falls back to the whitespace-collapsed input when nothing would remain.
pub fn clean_title(value: &str) -> String {
    let original = collapse_whitespace(value);
    let mut current = original.clone();
    for _ in 0..MAX_CLEANING_PASSES {
        let next = cleaning_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    if current.is_empty() {
        original
    } else {
        current
    }
}

/// Performer names get the same treatment plus channel-name suffixes.
pub fn clean_artist(value: &str) -> String {
    let cleaned = clean_title(value);
    let without_topic = cleaned
        .strip_suffix(" - Topic")
        .unwrap_or(&cleaned)
        .to_string();
    let without_vevo = match without_topic.strip_suffix("VEVO") {
        Some(head) if !head.trim().is_empty() => head.trim_end().to_string(),
        _ => without_topic,
    };
    collapse_whitespace(&without_vevo)
}
