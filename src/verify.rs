//! Transcript-length quality gate.
//!
//! Only gross mismatches are flagged: the transcript must carry more than one
//! extra word *and* more than six extra characters. Transcripts that come back
//! shorter than the source text always pass.

/// Extra words tolerated before a transcript is considered suspicious.
pub const MAX_EXTRA_TOKENS: isize = 1;

/// Extra characters tolerated before a transcript is considered suspicious.
pub const MAX_EXTRA_CHARS: isize = 6;

/// Result of checking one candidate against its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub passed: bool,
    pub transcript: String,
    pub ground_truth: String,
}

impl AttemptOutcome {
    pub fn check(ground_truth: &str, transcript: &str) -> Self {
        Self {
            passed: verify(ground_truth, transcript),
            transcript: transcript.to_string(),
            ground_truth: ground_truth.to_string(),
        }
    }
}

/// Returns `false` only when the transcript is longer than the ground truth
/// by more than [`MAX_EXTRA_TOKENS`] words and [`MAX_EXTRA_CHARS`] characters.
pub fn verify(ground_truth: &str, transcript: &str) -> bool {
    let (truth_tokens, truth_chars) = measure(ground_truth);
    let (heard_tokens, heard_chars) = measure(transcript);

    let token_delta = heard_tokens as isize - truth_tokens as isize;
    let char_delta = heard_chars as isize - truth_chars as isize;

    !(token_delta > MAX_EXTRA_TOKENS && char_delta > MAX_EXTRA_CHARS)
}

/// Count of word tokens and their total length in chars.
///
/// Whitespace-separated tokens without a single ASCII letter or digit are
/// ignored.
fn measure(text: &str) -> (usize, usize) {
    text.split_whitespace()
        .filter(|token| token.chars().any(|c| c.is_ascii_alphanumeric()))
        .fold((0, 0), |(count, chars), token| {
            (count + 1, chars + token.chars().count())
        })
}

#[cfg(test)]
mod tests {
    use super::{measure, verify, AttemptOutcome};

    #[test]
    fn two_short_extra_words_pass() {
        // token delta 2, char delta 2
        assert!(verify("a b c", "a b c d e"));
    }

    #[test]
    fn long_hallucinated_tail_fails() {
        assert!(!verify("hi", "hi there completely different extra words"));
    }

    #[test]
    fn one_extra_long_word_passes() {
        assert!(verify("the cat", "the cat extraordinarily"));
    }

    #[test]
    fn many_extra_chars_need_more_than_one_extra_token() {
        assert!(verify("a b", "a b supercalifragilistic"));
        assert!(!verify("a b", "a b supercalifragilistic again"));
    }

    #[test]
    fn punctuation_tokens_are_ignored() {
        assert_eq!(measure("Well , then - yes !"), (3, 11));
        assert!(verify("Well then yes", "Well , then - yes ! ... --"));
    }

    #[test]
    fn truncated_transcripts_are_not_flagged() {
        let truth = "It was the best of times, it was the worst of times.";
        assert!(verify(truth, ""));
        assert!(verify(truth, "It was"));
    }

    #[test]
    fn outcome_keeps_both_texts() {
        let outcome = AttemptOutcome::check("hi", "hi there completely different extra words");
        assert!(!outcome.passed);
        assert_eq!(outcome.ground_truth, "hi");
        assert_eq!(outcome.transcript, "hi there completely different extra words");
    }
}
