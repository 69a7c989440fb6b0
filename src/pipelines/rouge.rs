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

//! # ROUGE scores
//!
//! N-gram overlap (`rouge1`, `rouge2`), longest common subsequence (`rougeL`) and
//! summary-level longest common subsequence over newline-separated sentences (`rougeLsum`).
//!
//! Text is lower-cased, every run of characters other than `a-z0-9` becomes a token boundary and
//! tokens longer than three characters are optionally stemmed with the Snowball English stemmer.
//!
//! The Snowball stemmer is not the Porter stemmer of Python's `rouge_score`: the two disagree on
//! some words (e.g. `generously`), so stemmed scores can differ slightly from those reported by
//! `rouge_score`. Unstemmed scores are unaffected.
//!
//! ```
//! use rust_dialogsum::pipelines::rouge::{RougeScorer, RougeType};
//!
//! let scorer = RougeScorer::new(&[RougeType::Rouge1, RougeType::RougeL], true);
//! let scores = scorer.score("The cat sat on the mat.", "The cat was sitting on the mat.");
//! assert!(scores[&RougeType::Rouge1].fmeasure > 0.7);
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

lazy_static! {
    static ref NON_ALPHANUMERIC: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RougeType {
    Rouge1,
    Rouge2,
    RougeL,
    RougeLsum,
}

impl RougeType {
    pub fn name(&self) -> &'static str {
        match self {
            RougeType::Rouge1 => "rouge1",
            RougeType::Rouge2 => "rouge2",
            RougeType::RougeL => "rougeL",
            RougeType::RougeLsum => "rougeLsum",
        }
    }

    pub fn all() -> [RougeType; 4] {
        [
            RougeType::Rouge1,
            RougeType::Rouge2,
            RougeType::RougeL,
            RougeType::RougeLsum,
        ]
    }
}

impl fmt::Display for RougeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Score {
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

impl Score {
    fn from_counts(hits: usize, prediction_count: usize, target_count: usize) -> Score {
        let precision = if prediction_count > 0 {
            hits as f64 / prediction_count as f64
        } else {
            0.0
        };
        let recall = if target_count > 0 {
            hits as f64 / target_count as f64
        } else {
            0.0
        };
        let fmeasure = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Score {
            precision,
            recall,
            fmeasure,
        }
    }
}

fn counts<T: Eq + Hash, I: IntoIterator<Item = T>>(items: I) -> HashMap<T, usize> {
    let mut counter = HashMap::new();
    for item in items {
        *counter.entry(item).or_insert(0) += 1;
    }
    counter
}

fn ngram_score(target: &[String], prediction: &[String], n: usize) -> Score {
    let target_ngrams = counts(target.windows(n));
    let prediction_ngrams = counts(prediction.windows(n));
    let hits = target_ngrams
        .iter()
        .map(|(ngram, count)| (*count).min(*prediction_ngrams.get(ngram).unwrap_or(&0)))
        .sum();
    Score::from_counts(
        hits,
        prediction.len().saturating_sub(n - 1),
        target.len().saturating_sub(n - 1),
    )
}

fn lcs_table(target: &[String], prediction: &[String]) -> Vec<Vec<usize>> {
    let mut table = vec![vec![0; prediction.len() + 1]; target.len() + 1];
    for i in 1..=target.len() {
        for j in 1..=prediction.len() {
            table[i][j] = if target[i - 1] == prediction[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }
    table
}

/// Indices in `target` of one longest common subsequence with `prediction`.
fn lcs_indices(target: &[String], prediction: &[String]) -> Vec<usize> {
    let table = lcs_table(target, prediction);
    let (mut i, mut j) = (target.len(), prediction.len());
    let mut indices = Vec::new();
    while i > 0 && j > 0 {
        if target[i - 1] == prediction[j - 1] {
            indices.push(i - 1);
            i -= 1;
            j -= 1;
        } else if table[i][j - 1] > table[i - 1][j] {
            j -= 1;
        } else {
            i -= 1;
        }
    }
    indices.reverse();
    indices
}

fn lcs_score(target: &[String], prediction: &[String]) -> Score {
    if target.is_empty() || prediction.is_empty() {
        return Score::default();
    }
    let table = lcs_table(target, prediction);
    Score::from_counts(
        table[target.len()][prediction.len()],
        prediction.len(),
        target.len(),
    )
}

fn summary_level_lcs_score(targets: &[Vec<String>], predictions: &[Vec<String>]) -> Score {
    let target_count: usize = targets.iter().map(Vec::len).sum();
    let prediction_count: usize = predictions.iter().map(Vec::len).sum();
    if target_count == 0 || prediction_count == 0 {
        return Score::default();
    }

    let mut target_tokens = counts(targets.iter().flatten());
    let mut prediction_tokens = counts(predictions.iter().flatten());

    let mut hits = 0;
    for target in targets {
        let union: BTreeSet<usize> = predictions
            .iter()
            .flat_map(|prediction| lcs_indices(target, prediction))
            .collect();
        for token in union.into_iter().map(|index| &target[index]) {
            match (target_tokens.get_mut(token), prediction_tokens.get_mut(token)) {
                (Some(target_left), Some(prediction_left))
                    if *target_left > 0 && *prediction_left > 0 =>
                {
                    hits += 1;
                    *target_left -= 1;
                    *prediction_left -= 1;
                }
                _ => {}
            }
        }
    }
    Score::from_counts(hits, prediction_count, target_count)
}

/// # Scores a prediction against a reference text
pub struct RougeScorer {
    rouge_types: Vec<RougeType>,
    stemmer: Option<Stemmer>,
}

impl RougeScorer {
    pub fn new(rouge_types: &[RougeType], use_stemmer: bool) -> RougeScorer {
        RougeScorer {
            rouge_types: rouge_types.to_vec(),
            stemmer: use_stemmer.then(|| Stemmer::create(Algorithm::English)),
        }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        NON_ALPHANUMERIC
            .replace_all(&lowered, " ")
            .split_whitespace()
            .map(|token| match &self.stemmer {
                Some(stemmer) if token.len() > 3 => stemmer.stem(token).into_owned(),
                _ => token.to_string(),
            })
            .filter(|token| !token.is_empty())
            .collect()
    }

    fn tokenize_sentences(&self, text: &str) -> Vec<Vec<String>> {
        text.split('\n')
            .filter(|sentence| !sentence.is_empty())
            .map(|sentence| self.tokenize(sentence))
            .collect()
    }

    /// Scores `prediction` against `target` for every configured ROUGE type.
    pub fn score(&self, target: &str, prediction: &str) -> BTreeMap<RougeType, Score> {
        let target_tokens = self.tokenize(target);
        let prediction_tokens = self.tokenize(prediction);
        self.rouge_types
            .iter()
            .map(|rouge_type| {
                let score = match rouge_type {
                    RougeType::Rouge1 => ngram_score(&target_tokens, &prediction_tokens, 1),
                    RougeType::Rouge2 => ngram_score(&target_tokens, &prediction_tokens, 2),
                    RougeType::RougeL => lcs_score(&target_tokens, &prediction_tokens),
                    RougeType::RougeLsum => summary_level_lcs_score(
                        &self.tokenize_sentences(target),
                        &self.tokenize_sentences(prediction),
                    ),
                };
                (*rouge_type, score)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn tokenizer_normalizes_text() {
        let scorer = RougeScorer::new(&[RougeType::Rouge1], false);
        assert_eq!(
            scorer.tokenize("#Person1# can't COME, sorry!"),
            vec!["person1", "can", "t", "come", "sorry"]
        );
        let stemming_scorer = RougeScorer::new(&[RougeType::Rouge1], true);
        assert_eq!(
            stemming_scorer.tokenize("running dogs ran"),
            vec!["run", "dog", "ran"]
        );
    }

    #[test]
    fn stemming_follows_snowball_rules() {
        let stemming_scorer = RougeScorer::new(&[RougeType::Rouge1], true);
        assert_eq!(stemming_scorer.tokenize("generously"), vec!["generous"]);
    }

    #[test]
    fn ngram_overlap_is_clipped() {
        let score = ngram_score(&tokens("the the cat"), &tokens("the the the the"), 1);
        assert!((score.precision - 0.5).abs() < 1e-12);
        assert!((score.recall - 2.0 / 3.0).abs() < 1e-12);

        let bigrams = ngram_score(&tokens("a b c"), &tokens("a b d"), 2);
        assert!((bigrams.fmeasure - 0.5).abs() < 1e-12);
    }

    #[test]
    fn longest_common_subsequence() {
        let target = tokens("police killed the gunman");
        let prediction = tokens("police kill the gunman");
        let score = lcs_score(&target, &prediction);
        assert!((score.fmeasure - 0.75).abs() < 1e-12);
        assert_eq!(lcs_indices(&target, &prediction), vec![0, 2, 3]);
    }

    #[test]
    fn summary_level_lcs_matches_reference_example() {
        // Lin (2004), section 3.2: r = w1 w2 w3 w4 w5, c1 = w1 w2 w6 w7 w8, c2 = w1 w3 w8 w9 w5
        let targets = vec![tokens("w1 w2 w3 w4 w5")];
        let predictions = vec![tokens("w1 w2 w6 w7 w8"), tokens("w1 w3 w8 w9 w5")];
        let score = summary_level_lcs_score(&targets, &predictions);
        assert!((score.recall - 0.8).abs() < 1e-12);
        assert!((score.precision - 0.4).abs() < 1e-12);
    }

    #[test]
    fn empty_texts_score_zero() {
        let scorer = RougeScorer::new(&RougeType::all(), true);
        for score in scorer.score("", "something").values() {
            assert_eq!(score.fmeasure, 0.0);
        }
        for score in scorer.score("something", "").values() {
            assert_eq!(score.fmeasure, 0.0);
        }
    }

    #[test]
    fn identical_texts_score_one() {
        let scorer = RougeScorer::new(&RougeType::all(), true);
        let text = "Person1 invites Person2 to dinner.\nPerson2 accepts.";
        for (rouge_type, score) in scorer.score(text, text) {
            assert!((score.fmeasure - 1.0).abs() < 1e-12, "{rouge_type}");
        }
    }
}
