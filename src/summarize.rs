//! Extractive summaries for saved reports.

use std::collections::HashMap;

/// Texts shorter than this many words are returned unchanged.
const MIN_WORDS_TO_SUMMARIZE: usize = 30;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "for", "from", "had", "has", "have", "he", "her",
    "his", "if", "in", "into", "is", "it", "its", "more", "most", "not", "of", "on", "or", "our",
    "over", "she", "so", "than", "that", "the", "their", "them", "there", "these", "they", "this",
    "to", "up", "was", "we", "were", "which", "while", "will", "with", "would", "you",
];

/// Pick the `sentences` highest-scoring sentences and return them in their
/// original order. A sentence scores the mean frequency of its content words.
pub fn summarize(text: &str, sentences: usize) -> String {
    let text = text.trim();
    if text.split_whitespace().count() < MIN_WORDS_TO_SUMMARIZE {
        return text.to_string();
    }

    let parts = split_sentences(text);
    let keep = sentences.max(1);
    if parts.len() <= keep {
        return text.to_string();
    }

    let mut freq: HashMap<String, usize> = HashMap::new();
    for word in parts.iter().flat_map(|s| content_words(s)) {
        *freq.entry(word).or_default() += 1;
    }

    let mut scored: Vec<(usize, f64)> = parts
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let words = content_words(s);
            let score = if words.is_empty() {
                0.0
            } else {
                words.iter().map(|w| freq[w] as f64).sum::<f64>() / words.len() as f64
            };
            (i, score)
        })
        .collect();

    // Highest score first; earlier sentence wins ties.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut chosen: Vec<usize> = scored.into_iter().take(keep).map(|(i, _)| i).collect();
    chosen.sort_unstable();

    chosen
        .into_iter()
        .map(|i| parts[i])
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = i + ch.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                start = end;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn content_words(sentence: &str) -> Vec<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}
