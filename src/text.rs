//! Text helpers shared by the stages: key normalization and word tokenization
//!
//! Keys are compared after:
//! - Unicode NFKC fold
//! - lowercase conversion
//! - typographic apostrophes mapped to `'`
//! - punctuation other than in-word `'` and `-` replaced by space
//! - whitespace collapse

use unicode_normalization::UnicodeNormalization;

/// Normalize a surface string into a comparison key
pub fn normalize_key(s: &str) -> String {
    let folded: String = s
        .nfkc()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' | '`' => '\'',
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' => '-',
            other => other,
        })
        .collect();

    let mut out = String::with_capacity(folded.len());
    let chars: Vec<char> = folded.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let keep = if c.is_alphanumeric() {
            true
        } else if c == '\'' || c == '-' {
            // only inside a word
            let prev = i.checked_sub(1).and_then(|p| chars.get(p));
            let next = chars.get(i + 1);
            prev.is_some_and(|p| p.is_alphanumeric()) && next.is_some_and(|n| n.is_alphanumeric())
        } else {
            false
        };
        if keep {
            out.extend(c.to_lowercase());
        } else {
            out.push(' ');
        }
    }

    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.strip_prefix("the ") {
        Some(rest) => rest.to_string(),
        None => collapsed,
    }
}

/// A word of the source text with its byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl Word<'_> {
    pub fn is_capitalized(&self) -> bool {
        self.text.chars().next().is_some_and(char::is_uppercase)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

fn is_joiner(c: char) -> bool {
    matches!(c, '\'' | '-' | '\u{2019}')
}

/// Split text into words; `'` and `-` join letters on both sides (O'odham, Ho-Chunk)
pub fn words(text: &str) -> Vec<Word<'_>> {
    let mut result = Vec::new();
    let mut start: Option<usize> = None;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if is_word_char(c) {
            if start.is_none() {
                start = Some(i);
            }
            continue;
        }
        if let Some(s) = start {
            let next_is_word = iter.peek().is_some_and(|&(_, n)| is_word_char(n));
            if is_joiner(c) && next_is_word {
                continue;
            }
            result.push(Word {
                text: &text[s..i],
                start: s,
                end: i,
            });
            start = None;
        }
    }
    if let Some(s) = start {
        result.push(Word {
            text: &text[s..],
            start: s,
            end: text.len(),
        });
    }
    result
}

/// True if the word at `index` starts a sentence (first word, or after `.`, `?`, `!`)
pub fn is_sentence_initial(text: &str, words: &[Word<'_>], index: usize) -> bool {
    let Some(word) = words.get(index) else {
        return false;
    };
    let before = match index.checked_sub(1).and_then(|p| words.get(p)) {
        Some(prev) => &text[prev.end..word.start],
        None => return true,
    };
    before.contains(['.', '?', '!', ':', '"', '\u{201C}'])
}

/// Capitalize each word's first letter: "jodi burshia" -> "Jodi Burshia"
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
