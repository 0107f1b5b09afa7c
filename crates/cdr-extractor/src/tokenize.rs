//! Text preparation
//!
//! Sentence splitting and tokenization with document-level character offsets
//! (half-open, counted in `char`s rather than bytes).

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use cdr_core::{AnnotatedDocument, CdrError, DataConfig, Result, Sentence, Token};

/// Word-like runs with inner `-`/`'`, or a single other visible character
const TOKEN_PATTERN: &str =
    r"[\p{L}\p{M}\p{N}]+(?:['\-][\p{L}\p{M}\p{N}]+)*|[^\s\p{L}\p{M}\p{N}]";

/// Breaks text after sentence-final punctuation followed by whitespace
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    delimiters: Vec<char>,
    abbreviations: HashSet<String>,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new("")
    }
}

impl SentenceSplitter {
    /// `.`, `!` and `?` always end a sentence; `extra` adds more delimiters
    pub fn new(extra: &str) -> Self {
        let mut delimiters = vec!['.', '!', '?'];
        delimiters.extend(extra.chars().filter(|c| !c.is_whitespace()));
        Self {
            delimiters,
            abbreviations: HashSet::new(),
        }
    }

    /// Words after which a period never ends a sentence
    pub fn with_abbreviations<I, S>(mut self, abbreviations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.abbreviations.extend(
            abbreviations
                .into_iter()
                .map(|a| a.as_ref().trim().trim_end_matches('.').to_lowercase())
                .filter(|a| !a.is_empty()),
        );
        self
    }

    /// One abbreviation per line; `#` starts a comment line
    pub fn load_abbreviations(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CdrError::io(path, e))?;
        let entries: Vec<&str> = content
            .lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .collect();
        Ok(self.with_abbreviations(entries))
    }

    /// Sentence spans as `[start, end)` char offsets, trimmed of whitespace
    pub fn split(&self, text: &str) -> Vec<(usize, usize)> {
        let chars: Vec<char> = text.chars().collect();
        let mut spans = Vec::new();
        let mut start = 0;

        for i in 0..chars.len() {
            let boundary = self.delimiters.contains(&chars[i])
                && chars.get(i + 1).map_or(true, |c| c.is_whitespace())
                && !self.is_abbreviation(&chars, i);
            if boundary {
                push_trimmed(&chars, start, i + 1, &mut spans);
                start = i + 1;
            }
        }
        push_trimmed(&chars, start, chars.len(), &mut spans);
        spans
    }

    fn is_abbreviation(&self, chars: &[char], period: usize) -> bool {
        if chars[period] != '.' {
            return false;
        }
        let mut begin = period;
        while begin > 0 && (chars[begin - 1].is_alphanumeric() || chars[begin - 1] == '.') {
            begin -= 1;
        }
        let word: String = chars[begin..period].iter().collect();
        let mut letters = word.chars();
        // "E. coli" is an initial, "vitamin C. Patients" ends a sentence
        if let (Some(c), None) = (letters.next(), letters.next()) {
            if c.is_uppercase() && next_word_is_lowercase(chars, period + 1) {
                return true;
            }
        }
        self.abbreviations.contains(&word.to_lowercase())
    }
}

fn next_word_is_lowercase(chars: &[char], from: usize) -> bool {
    chars[from..]
        .iter()
        .find(|c| !c.is_whitespace())
        .is_some_and(|c| c.is_lowercase())
}

fn push_trimmed(chars: &[char], mut start: usize, mut end: usize, spans: &mut Vec<(usize, usize)>) {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    if start < end {
        spans.push((start, end));
    }
}

/// Regex tokenizer producing char-offset tokens
#[derive(Debug, Clone)]
pub struct Tokenizer {
    pattern: Regex,
}

impl Tokenizer {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(TOKEN_PATTERN)
            .map_err(|e| CdrError::InvalidInput(format!("token pattern: {e}")))?;
        Ok(Self { pattern })
    }

    /// Tokens of `text`, which starts at char offset `offset` of its document
    pub fn tokenize(&self, text: &str, offset: usize) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut byte_pos = 0;
        let mut char_pos = offset;

        for m in self.pattern.find_iter(text) {
            char_pos += text[byte_pos..m.start()].chars().count();
            byte_pos = m.start();
            tokens.push(Token::new(m.as_str(), char_pos, tokens.len()));
        }
        tokens
    }
}

/// Sentence splitting plus tokenization of whole documents
#[derive(Debug, Clone)]
pub struct TextPreparer {
    splitter: SentenceSplitter,
    tokenizer: Tokenizer,
}

impl TextPreparer {
    pub fn new(splitter: SentenceSplitter) -> Result<Self> {
        Ok(Self {
            splitter,
            tokenizer: Tokenizer::new()?,
        })
    }

    /// Splitter configured from the data section
    pub fn from_config(config: &DataConfig) -> Result<Self> {
        let mut splitter = SentenceSplitter::new(&config.sentence_delimiters);
        if let Some(path) = &config.abbreviations {
            splitter = splitter.load_abbreviations(path)?;
        }
        Self::new(splitter)
    }

    pub fn prepare(&self, text: &str) -> Vec<Sentence> {
        let byte_at: Vec<usize> = text
            .char_indices()
            .map(|(b, _)| b)
            .chain(std::iter::once(text.len()))
            .collect();

        self.splitter
            .split(text)
            .into_iter()
            .map(|(start, end)| {
                let slice = &text[byte_at[start]..byte_at[end]];
                Sentence::new(start, end - start, self.tokenizer.tokenize(slice, start))
            })
            .collect()
    }

    /// Sentences of title + " " + abstract
    pub fn prepare_document(&self, document: &AnnotatedDocument) -> Vec<Sentence> {
        self.prepare(&document.content())
    }
}
