//! Chat text sanitization.
//!
//! The server only depends on [`TextSanitizer`]; deployments can plug in
//! their own moderation. [`WordFilter`] is the built-in default.

/// Result of sanitizing one chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub clean: String,
    pub flagged: bool,
}

/// A pure text cleaning function. Implementations must not have side effects.
pub trait TextSanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> Sanitized;
}

impl<F> TextSanitizer for F
where
    F: Fn(&str) -> Sanitized + Send + Sync,
{
    fn sanitize(&self, text: &str) -> Sanitized {
        self(text)
    }
}

/// Masks blocked words with `*` and strips control characters.
///
/// Matching is whole-word and case-insensitive; a line is flagged when at
/// least one word was masked.
#[derive(Debug, Clone)]
pub struct WordFilter {
    blocked: Vec<String>,
}

impl WordFilter {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocked = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { blocked }
    }

    fn is_blocked(&self, word: &str) -> bool {
        let lowered = word.to_lowercase();
        self.blocked.iter().any(|b| *b == lowered)
    }
}

impl Default for WordFilter {
    fn default() -> Self {
        Self::new(["scam", "spam", "idiot"])
    }
}

impl TextSanitizer for WordFilter {
    fn sanitize(&self, text: &str) -> Sanitized {
        let mut clean = String::with_capacity(text.len());
        let mut word = String::new();
        let mut flagged = false;

        let mut flush = |word: &mut String, clean: &mut String| {
            if word.is_empty() {
                return;
            }
            if self.is_blocked(word) {
                flagged = true;
                clean.extend(std::iter::repeat('*').take(word.chars().count()));
            } else {
                clean.push_str(word);
            }
            word.clear();
        };

        for c in text.chars().filter(|c| !c.is_control()) {
            if c.is_alphanumeric() {
                word.push(c);
            } else {
                flush(&mut word, &mut clean);
                clean.push(c);
            }
        }
        flush(&mut word, &mut clean);

        Sanitized { clean, flagged }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_passes_through() {
        let filter = WordFilter::default();
        let result = filter.sanitize("hello plaza!");
        assert_eq!(result.clean, "hello plaza!");
        assert!(!result.flagged);
    }

    #[test]
    fn test_blocked_word_is_masked_case_insensitively() {
        let filter = WordFilter::new(["spam"]);
        let result = filter.sanitize("no SPAM, please");
        assert_eq!(result.clean, "no ****, please");
        assert!(result.flagged);
    }

    #[test]
    fn test_only_whole_words_match() {
        let filter = WordFilter::new(["spam"]);
        let result = filter.sanitize("spammer");
        assert_eq!(result.clean, "spammer");
        assert!(!result.flagged);
    }

    #[test]
    fn test_control_characters_are_stripped() {
        let filter = WordFilter::new(Vec::<String>::new());
        let result = filter.sanitize("a\u{0007}b\nc");
        assert_eq!(result.clean, "abc");
        assert!(!result.flagged);
    }

    #[test]
    fn test_closure_sanitizer() {
        let upper = |text: &str| Sanitized {
            clean: text.to_uppercase(),
            flagged: false,
        };
        assert_eq!(upper.sanitize("hi").clean, "HI");
    }
}
