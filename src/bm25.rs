//! In-memory sparse (Okapi BM25) index. Serializes to a single opaque blob
//! at `index/bm25.pkl` via `crate::object_store::ObjectStore`.

use crate::model::{Bm25Artifact, HitSource, RetrievalHit};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

const K1: f32 = 1.5;
const B: f32 = 0.75;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

/// Case-folded, Unicode-aware word tokenization (§4.3).
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// The serializable BM25 model: per-term postings plus the corpus
/// statistics needed to score new queries. Independent of the raw
/// `contents`/`filenames` arrays, which `Bm25Artifact` carries alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25State {
    doc_count: usize,
    avg_doc_len: f32,
    doc_lengths: Vec<u32>,
    /// term -> [(doc_id, term_frequency)]
    postings: HashMap<String, Vec<(u32, u32)>>,
}

impl Bm25State {
    fn idf(&self, doc_freq: usize) -> f32 {
        let n = self.doc_count as f32;
        let df = doc_freq as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, query_terms: &[String]) -> HashMap<u32, f32> {
        let mut scores: HashMap<u32, f32> = HashMap::new();
        for term in query_terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(postings.len());
            for &(doc_id, tf) in postings {
                let tf = tf as f32;
                let dl = self.doc_lengths[doc_id as usize] as f32;
                let denom = tf + K1 * (1.0 - B + B * dl / self.avg_doc_len.max(1.0));
                let term_score = idf * (tf * (K1 + 1.0)) / denom.max(f32::EPSILON);
                *scores.entry(doc_id).or_insert(0.0) += term_score;
            }
        }
        scores
    }
}

/// The in-memory index: BM25 statistics plus the aligned source arrays
/// needed to materialize hits.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    state: Bm25State,
    contents: Vec<String>,
    filenames: Vec<String>,
}

impl Bm25Index {
    /// Builds a fresh BM25 state from parallel `contents`/`filenames`
    /// arrays. Empty input yields a zero-document index whose `search`
    /// always returns no hits.
    pub fn build(contents: Vec<String>, filenames: Vec<String>) -> Self {
        assert_eq!(contents.len(), filenames.len(), "contents/filenames must be aligned");

        let tokenized: Vec<Vec<String>> = contents.iter().map(|c| tokenize(c)).collect();
        let doc_lengths: Vec<u32> = tokenized.iter().map(|t| t.len() as u32).collect();
        let doc_count = contents.len();
        let avg_doc_len = if doc_count == 0 {
            0.0
        } else {
            doc_lengths.iter().sum::<u32>() as f32 / doc_count as f32
        };

        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        for (doc_id, terms) in tokenized.iter().enumerate() {
            let mut term_freq: HashMap<&str, u32> = HashMap::new();
            for t in terms {
                *term_freq.entry(t.as_str()).or_insert(0) += 1;
            }
            for (term, tf) in term_freq {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push((doc_id as u32, tf));
            }
        }

        Self {
            state: Bm25State {
                doc_count,
                avg_doc_len,
                doc_lengths,
                postings,
            },
            contents,
            filenames,
        }
    }

    /// Returns strictly positive-score hits, ordered descending, ties
    /// broken by insertion (document) order.
    pub fn search(&self, query: &str, k: usize) -> Vec<RetrievalHit> {
        let query_terms = tokenize(query);
        let scores = self.state.score(&query_terms);

        let mut hits: Vec<(u32, f32)> = scores
            .into_iter()
            .filter(|&(_, score)| score > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);

        hits.into_iter()
            .map(|(doc_id, score)| RetrievalHit {
                content: self.contents[doc_id as usize].clone(),
                filename: self.filenames[doc_id as usize].clone(),
                score,
                source: HitSource::Bm25,
                rerank_score: None,
            })
            .collect()
    }

    pub fn into_artifact(self) -> Bm25Artifact {
        Bm25Artifact {
            state: self.state,
            contents: self.contents,
            filenames: self.filenames,
        }
    }

    pub fn from_artifact(artifact: Bm25Artifact) -> Self {
        Self {
            state: artifact.state,
            contents: artifact.contents,
            filenames: artifact.filenames,
        }
    }

    pub fn contents(&self) -> &[String] {
        &self.contents
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_is_case_folded_and_unicode_aware() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
        assert_eq!(tokenize("café_42"), vec!["café_42"]);
    }

    #[test]
    fn search_returns_only_positive_scores_desc() {
        let idx = Bm25Index::build(
            vec![
                "the quick brown fox".to_string(),
                "lazy dog sleeps".to_string(),
                "quick quick fox fox fox".to_string(),
            ],
            vec!["a.txt".into(), "b.txt".into(), "c.txt".into()],
        );
        let hits = idx.search("quick fox", 10);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.score > 0.0));
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // c.txt repeats the query terms most densely, should rank first.
        assert_eq!(hits[0].filename, "c.txt");
    }

    #[test]
    fn search_excludes_non_matching_documents() {
        let idx = Bm25Index::build(
            vec!["alpha beta".to_string(), "gamma delta".to_string()],
            vec!["a.txt".into(), "b.txt".into()],
        );
        let hits = idx.search("zzz_not_present", 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn artifact_roundtrip_preserves_search_results() {
        let idx = Bm25Index::build(
            vec!["hello world".to_string(), "goodbye world".to_string()],
            vec!["a.txt".into(), "b.txt".into()],
        );
        let before = idx.search("hello", 10);
        let artifact = idx.into_artifact();
        let json = serde_json::to_string(&artifact).unwrap();
        let restored: Bm25Artifact = serde_json::from_str(&json).unwrap();
        let idx2 = Bm25Index::from_artifact(restored);
        let after = idx2.search("hello", 10);
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].filename, after[0].filename);
    }

    #[test]
    fn empty_corpus_never_matches() {
        let idx = Bm25Index::build(vec![], vec![]);
        assert!(idx.search("anything", 5).is_empty());
    }
}
