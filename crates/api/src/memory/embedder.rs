//! Offline deterministic embedding generator.
//!
//! Hashes each token into a fixed-dimension signed bag-of-words vector, then
//! L2-normalizes. Not semantically deep, but stable across runs, which is
//! what local mode and the tests need.

use sha2::{Digest, Sha256};

pub struct DeterministicEmbedder {
    dimension: usize,
    model_name: String,
}

impl DeterministicEmbedder {
    pub fn new(dimension: usize, model_name: String) -> Self {
        Self {
            dimension: dimension.max(1),
            model_name,
        }
    }

    pub fn provider(&self) -> &'static str {
        "deterministic"
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text into a normalized vector.
    pub fn embed(&self, text: &str) -> Vec<f64> {
        let cleaned = text.trim().to_lowercase();
        let mut vector = vec![0.0f64; self.dimension];
        if cleaned.is_empty() {
            vector[0] = 1.0;
            return vector;
        }

        for token in Self::tokenize(&cleaned) {
            let digest = Sha256::digest(token.as_bytes());
            let index = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dimension;
            let sign = if digest[4] % 2 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + f64::from(digest[5]) / 255.0;
            vector[index] += sign * magnitude;
        }
        normalize(vector)
    }

    /// Split into word tokens; non-alphanumeric symbols become single-char
    /// tokens so CJK text still contributes signal.
    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut buffer = String::new();
        for ch in text.chars() {
            if ch.is_whitespace() {
                if !buffer.is_empty() {
                    tokens.push(std::mem::take(&mut buffer));
                }
                continue;
            }
            if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                buffer.push(ch);
                continue;
            }
            if !buffer.is_empty() {
                tokens.push(std::mem::take(&mut buffer));
            }
            tokens.push(ch.to_string());
        }
        if !buffer.is_empty() {
            tokens.push(buffer);
        }
        tokens
    }
}

fn normalize(mut vector: Vec<f64>) -> Vec<f64> {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_deterministic() {
        let embedder = DeterministicEmbedder::new(32, "deterministic-v1".into());
        assert_eq!(embedder.embed("the guild controls coal"), embedder.embed("the guild controls coal"));
        assert_ne!(embedder.embed("coal"), embedder.embed("steam"));
    }

    #[test]
    fn vectors_are_unit_length() {
        let embedder = DeterministicEmbedder::new(32, "deterministic-v1".into());
        let vector = embedder.embed("pressure rises in the lower districts");
        let norm: f64 = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_gets_a_fixed_basis_vector() {
        let embedder = DeterministicEmbedder::new(8, "deterministic-v1".into());
        let vector = embedder.embed("   ");
        assert_eq!(vector[0], 1.0);
        assert!(vector[1..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let embedder = DeterministicEmbedder::new(64, "deterministic-v1".into());
        let query = embedder.embed("drought in the north");
        let related = embedder.embed("the north suffers a long drought");
        let unrelated = embedder.embed("naval parade celebrates the armistice");
        let dot = |a: &[f64], b: &[f64]| -> f64 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }
}
