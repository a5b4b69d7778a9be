//! The search pattern dialect.
//!
//! Insertion searches and string searches accept a deliberately small
//! pattern language: literal characters, `.`, `.*`, `.+` and character
//! classes `[abc]`, concatenated. No alternation, no backreferences. The
//! pattern compiles to an anchored [`regex::Regex`]; the maximal literal
//! runs are kept alongside so an n-gram index can prefilter candidates.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct SearchPattern {
    source: String,
    regex: Regex,
    literal_runs: Vec<String>,
}

impl SearchPattern {
    /// Parse and compile a pattern. Errors describe the offending position.
    pub fn parse(pattern: &str) -> Result<SearchPattern, String> {
        let mut regex_body = String::new();
        let mut literal_runs = Vec::new();
        let mut current_run = String::new();
        let mut characters = pattern.char_indices().peekable();

        let mut flush_run = |run: &mut String, runs: &mut Vec<String>| {
            if !run.is_empty() {
                runs.push(std::mem::take(run));
            }
        };

        while let Some((offset, character)) = characters.next() {
            match character {
                '.' => {
                    flush_run(&mut current_run, &mut literal_runs);
                    match characters.peek() {
                        Some((_, '*')) => {
                            characters.next();
                            regex_body.push_str(".*");
                        }
                        Some((_, '+')) => {
                            characters.next();
                            regex_body.push_str(".+");
                        }
                        _ => regex_body.push('.'),
                    }
                }
                '[' => {
                    flush_run(&mut current_run, &mut literal_runs);
                    let mut class = String::new();
                    loop {
                        match characters.next() {
                            Some((_, ']')) => break,
                            Some((_, inner)) if inner.is_ascii_alphanumeric() => {
                                class.push(inner);
                            }
                            Some((inner_offset, inner)) => {
                                return Err(format!(
                                    "invalid character '{inner}' in class at byte {inner_offset}"
                                ));
                            }
                            None => return Err("unterminated character class".to_string()),
                        }
                    }
                    if class.is_empty() {
                        return Err(format!("empty character class at byte {offset}"));
                    }
                    regex_body.push('[');
                    regex_body.push_str(&class);
                    regex_body.push(']');
                }
                literal if literal.is_ascii_alphanumeric() => {
                    current_run.push(literal);
                    regex_body.push(literal);
                }
                other => {
                    return Err(format!(
                        "unsupported pattern character '{other}' at byte {offset}"
                    ));
                }
            }
        }
        flush_run(&mut current_run, &mut literal_runs);

        let regex = Regex::new(&format!("^(?:{regex_body})$"))
            .map_err(|error| format!("pattern does not compile: {error}"))?;
        Ok(SearchPattern {
            source: pattern.to_string(),
            regex,
            literal_runs,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Full anchored match against a stored text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Maximal literal runs, in pattern order.
    pub fn literal_runs(&self) -> &[String] {
        &self.literal_runs
    }

    /// All n-grams of length `n` across the literal runs.
    pub fn ngrams(&self, n: usize) -> Vec<&str> {
        let mut result = Vec::new();
        for run in &self.literal_runs {
            if run.len() >= n {
                for start in 0..=run.len() - n {
                    result.push(&run[start..start + n]);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_and_literals_compile() {
        let pattern = SearchPattern::parse(".*CCG.+A").unwrap();
        assert!(pattern.matches("TTCCGTA"));
        assert!(pattern.matches("CCGAA"));
        assert!(!pattern.matches("CCG"));
        assert_eq!(pattern.literal_runs(), &["CCG".to_string(), "A".to_string()]);
    }

    #[test]
    fn matches_are_anchored() {
        let pattern = SearchPattern::parse("CC").unwrap();
        assert!(pattern.matches("CC"));
        assert!(!pattern.matches("ACCA"));
    }

    #[test]
    fn character_classes_match_any_member() {
        let pattern = SearchPattern::parse("A[CG]T").unwrap();
        assert!(pattern.matches("ACT"));
        assert!(pattern.matches("AGT"));
        assert!(!pattern.matches("ATT"));
    }

    #[test]
    fn literals_match_case_sensitively() {
        let pattern = SearchPattern::parse("acgt").unwrap();
        assert!(pattern.matches("acgt"));
        assert!(!pattern.matches("ACGT"));
    }

    #[test]
    fn single_dot_matches_one_character() {
        let pattern = SearchPattern::parse("A.C").unwrap();
        assert!(pattern.matches("ABC"));
        assert!(!pattern.matches("AC"));
        assert!(!pattern.matches("AXXC"));
    }

    #[test]
    fn unsupported_syntax_is_rejected() {
        assert!(SearchPattern::parse("A|B").is_err());
        assert!(SearchPattern::parse("A(B)").is_err());
        assert!(SearchPattern::parse("[A").is_err());
        assert!(SearchPattern::parse("[]").is_err());
        assert!(SearchPattern::parse("A\\d").is_err());
    }

    #[test]
    fn ngrams_come_from_literal_runs_only() {
        let pattern = SearchPattern::parse(".*TTACAT.*ACCA.*").unwrap();
        let trigrams = pattern.ngrams(3);
        assert!(trigrams.contains(&"TTA"));
        assert!(trigrams.contains(&"CAT"));
        assert!(trigrams.contains(&"ACC"));
        assert!(trigrams.contains(&"CCA"));
        // Short runs produce none.
        let short = SearchPattern::parse(".*CC.*").unwrap();
        assert!(short.ngrams(3).is_empty());
    }
}
