use anyhow::Result;
use regex::Regex;

/// Splits text into sentences in document order.
pub trait SentenceSplitter: Send + Sync {
    fn split(&self, text: &str) -> Vec<String>;
}

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "vs", "etc", "e.g", "i.e", "lt",
    "capt", "sgt", "hon", "inc", "ltd", "approx", "dept",
];

/// Abbreviations that only hold before a number, as in `No. 5` or `Vol. 2`.
/// Elsewhere these are ordinary words that can end a sentence.
const NUMBER_PREFIXES: &[&str] = &["no", "vol", "ch", "fig", "pp"];

/// English sentence splitter driven by terminal punctuation.
///
/// A boundary is a run of `.`, `!`, `?` or `…` (optionally followed by closing
/// quotes or brackets) and then whitespace. Boundaries are rejected when the
/// next word starts lowercase, or when a lone period follows a known
/// abbreviation or a single-letter initial. Number prefixes such as `No.`
/// only hold when a digit follows. Line breaks inside a sentence are kept.
pub struct RegexSentenceSplitter {
    boundary: Regex,
}

impl RegexSentenceSplitter {
    pub fn new() -> Result<Self> {
        let boundary = Regex::new(r#"[.!?…]+["'”’)\]]*(\s+)"#)?;
        Ok(Self { boundary })
    }

    fn is_boundary(
        &self,
        text: &str,
        sentence_start: usize,
        term_start: usize,
        term: &str,
        next_start: usize,
    ) -> bool {
        let next = text[next_start..].chars().next();
        if next.is_some_and(char::is_lowercase) {
            return false;
        }

        let bare = term.trim_end_matches(|c: char| !matches!(c, '.' | '!' | '?' | '…'));
        if bare != "." {
            return true;
        }

        let word = text[sentence_start..term_start]
            .split_whitespace()
            .last()
            .unwrap_or_default()
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();

        if word.chars().count() == 1 && word.chars().all(char::is_alphabetic) {
            return false;
        }

        if NUMBER_PREFIXES.contains(&word.as_str()) {
            return !next.is_some_and(|c| c.is_ascii_digit());
        }

        !ABBREVIATIONS.contains(&word.as_str())
    }
}

impl SentenceSplitter for RegexSentenceSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for caps in self.boundary.captures_iter(text) {
            let (Some(whole), Some(space)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() < start {
                continue;
            }

            let term = &text[whole.start()..space.start()];
            if !self.is_boundary(text, start, whole.start(), term, space.end()) {
                continue;
            }

            push_trimmed(&mut sentences, &text[start..space.start()]);
            start = space.end();
        }

        push_trimmed(&mut sentences, &text[start..]);
        sentences
    }
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str) -> Vec<String> {
        RegexSentenceSplitter::new().unwrap().split(text)
    }

    #[test]
    fn splits_on_terminal_punctuation() {
        assert_eq!(
            split("He ran. She followed! Did they escape? Nobody knows."),
            vec![
                "He ran.",
                "She followed!",
                "Did they escape?",
                "Nobody knows."
            ]
        );
    }

    #[test]
    fn keeps_abbreviations_and_initials_together() {
        assert_eq!(
            split("Mr. Grey met Dr. Vale and J. R. Hart. They talked."),
            vec!["Mr. Grey met Dr. Vale and J. R. Hart.", "They talked."]
        );
    }

    #[test]
    fn no_ends_a_sentence_unless_a_number_follows() {
        assert_eq!(
            split("He said no. She left. Room No. 5 was empty."),
            vec!["He said no.", "She left.", "Room No. 5 was empty."]
        );
        assert_eq!(
            split("It was the vol. Then silence. See Vol. 2 for more."),
            vec!["It was the vol.", "Then silence.", "See Vol. 2 for more."]
        );
    }

    #[test]
    fn common_words_are_not_abbreviations() {
        assert_eq!(
            split("He joined the co. Later he quit. Nobody asked the gen. Why?"),
            vec!["He joined the co.", "Later he quit.", "Nobody asked the gen.", "Why?"]
        );
    }

    #[test]
    fn closing_quotes_stay_with_their_sentence() {
        assert_eq!(
            split("\"Run!\" Arthur shouted. \"Now.\" The gate fell."),
            vec!["\"Run!\"", "Arthur shouted.", "\"Now.\"", "The gate fell."]
        );
    }

    #[test]
    fn lowercase_continuation_is_not_a_boundary() {
        assert_eq!(
            split("\"Wait!\" she cried. It was late."),
            vec!["\"Wait!\" she cried.", "It was late."]
        );
    }

    #[test]
    fn internal_line_breaks_are_preserved() {
        let sentences = split("[System]\nLevel up\nMana +10\n\nHe smiled.");
        assert_eq!(sentences, vec!["[System]\nLevel up\nMana +10\n\nHe smiled."]);
    }

    #[test]
    fn decimals_and_empty_input() {
        assert_eq!(
            split("It cost 3.5 gold. Cheap."),
            vec!["It cost 3.5 gold.", "Cheap."]
        );
        assert!(split("   \n ").is_empty());
    }
}
