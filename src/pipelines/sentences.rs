// Copyright 2022 rust-dialogsum authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Sentence segmentation for English summaries
//!
//! A sentence ends at `.`, `!` or `?` (optionally followed by more terminal punctuation and
//! closing quotes or brackets) when whitespace follows and the next word does not start with a
//! lower case letter. Periods closing a common abbreviation or a single-letter initial do not
//! end a sentence.

/// Lower-cased abbreviations whose final period does not end a sentence
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "st", "jr", "sr", "prof", "vs", "e.g", "i.e",
];

fn is_terminal(character: char) -> bool {
    matches!(character, '.' | '!' | '?')
}

fn is_closing(character: char) -> bool {
    matches!(character, '"' | '\'' | ')' | ']' | '}')
}

/// True if the word right before the period at `period_position` is an abbreviation or an
/// initial.
fn ends_with_abbreviation(text: &str, period_position: usize) -> bool {
    let before = &text[..period_position];
    let word = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(|character: char| !character.is_alphanumeric())
        .to_lowercase();
    if word.chars().count() == 1 {
        return word.chars().all(char::is_alphabetic);
    }
    ABBREVIATIONS.contains(&word.as_str())
}

/// Splits `text` into trimmed, non-empty sentences.
///
/// # Example
///
/// ```
/// use rust_dialogsum::pipelines::sentences::split_sentences;
///
/// let sentences = split_sentences("Mr. Smith is late. #Person1# waits for him.");
/// assert_eq!(sentences, vec!["Mr. Smith is late.", "#Person1# waits for him."]);
/// ```
pub fn split_sentences(text: &str) -> Vec<String> {
    let characters: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while index < characters.len() {
        let (position, character) = characters[index];
        if !is_terminal(character) {
            index += 1;
            continue;
        }
        let mut last = index;
        while last + 1 < characters.len()
            && (is_terminal(characters[last + 1].1) || is_closing(characters[last + 1].1))
        {
            last += 1;
        }
        let end = characters
            .get(last + 1)
            .map_or(text.len(), |(position, _)| *position);

        let followed_by_space = characters
            .get(last + 1)
            .map_or(false, |(_, next)| next.is_whitespace());
        let next_word_is_lower = characters[last + 1..]
            .iter()
            .find(|(_, next)| !next.is_whitespace())
            .map_or(false, |(_, next)| next.is_lowercase());
        let is_abbreviation =
            character == '.' && last == index && ends_with_abbreviation(text, position);

        if followed_by_space && !next_word_is_lower && !is_abbreviation {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
        index = last + 1;
    }

    let remainder = text[start..].trim();
    if !remainder.is_empty() {
        sentences.push(remainder.to_string());
    }
    sentences
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation() {
        assert_eq!(
            split_sentences("Hello there. How are you? Fine!"),
            vec!["Hello there.", "How are you?", "Fine!"]
        );
    }

    #[test]
    fn keeps_abbreviations_and_initials() {
        assert_eq!(
            split_sentences("Dr. Brown meets J. Smith. They talk, e.g. about work."),
            vec!["Dr. Brown meets J. Smith.", "They talk, e.g. about work."]
        );
    }

    #[test]
    fn keeps_decimals_and_lowercase_continuations() {
        assert_eq!(
            split_sentences("It costs 3.5 dollars. Wait... what? Yes."),
            vec!["It costs 3.5 dollars.", "Wait... what?", "Yes."]
        );
    }

    #[test]
    fn handles_closing_quotes_and_blank_input() {
        assert_eq!(
            split_sentences("He said \"stop.\" She left."),
            vec!["He said \"stop.\"", "She left."]
        );
        assert!(split_sentences("  \n ").is_empty());
        assert_eq!(split_sentences("no terminal punctuation"), vec!["no terminal punctuation"]);
    }
}
