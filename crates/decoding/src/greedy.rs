use model::{SpecialTokens, Transformer};
use rayon::prelude::*;

use crate::{
    config::check_budget, DecodeError, Hypothesis, MaxLengthPolicy, StepScorer, TransformerScorer,
};

/// Picks the most probable next token at every step.
#[derive(Debug, Clone)]
pub struct GreedyDecoder {
    tokens: SpecialTokens,
}

impl GreedyDecoder {
    pub fn new(tokens: SpecialTokens) -> Self {
        Self { tokens }
    }

    pub fn decode(
        &self,
        model: &Transformer,
        source: &[u32],
        max_len: usize,
    ) -> Result<Hypothesis, DecodeError> {
        check_budget(max_len, Some(model.config().max_seq_len))?;
        if source.iter().all(|&token| token == self.tokens.pad) {
            return Ok(Hypothesis {
                tokens: vec![self.tokens.end],
                score: 0.0,
                normalized_score: 0.0,
                finished: true,
            });
        }
        let mut scorer = TransformerScorer::new(model, source)?;
        self.search(&mut scorer, max_len)
    }

    /// Decodes every source independently across the rayon pool, keeping input order.
    pub fn decode_batch(
        &self,
        model: &Transformer,
        sources: &[Vec<u32>],
        policy: &MaxLengthPolicy,
    ) -> Result<Vec<Hypothesis>, DecodeError> {
        policy.validate()?;
        let max_seq_len = model.config().max_seq_len;
        sources
            .par_iter()
            .map(|source| {
                let content = source.iter().filter(|&&t| t != self.tokens.pad).count();
                self.decode(model, source, policy.max_len(content, max_seq_len))
            })
            .collect()
    }

    pub fn search<S>(&self, scorer: &mut S, max_len: usize) -> Result<Hypothesis, DecodeError>
    where
        S: StepScorer + ?Sized,
    {
        check_budget(max_len, None)?;
        let mut prefix = vec![self.tokens.start];
        let mut score = 0.0f32;
        let mut finished = false;

        for step in 0..max_len {
            let rows = scorer.log_probs(std::slice::from_ref(&prefix))?;
            let row = match rows.as_slice() {
                [row] => row,
                _ => {
                    return Err(DecodeError::InvalidScores(format!(
                        "expected 1 row, got {}",
                        rows.len()
                    )))
                }
            };
            if row.iter().any(|value| !value.is_finite()) {
                return Err(DecodeError::NonFinite { step, beam: 0 });
            }
            let (token, log_prob) = argmax(row)
                .ok_or_else(|| DecodeError::InvalidScores("empty vocabulary".into()))?;
            prefix.push(token);
            score += log_prob;
            if token == self.tokens.end {
                finished = true;
                break;
            }
        }

        prefix.remove(0);
        Ok(Hypothesis {
            tokens: prefix,
            score,
            normalized_score: score,
            finished,
        })
    }
}

/// Index and value of the largest entry; the lowest index wins ties.
fn argmax(values: &[f32]) -> Option<(u32, f32)> {
    let mut best: Option<(u32, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        if best.map_or(true, |(_, best_value)| value > best_value) {
            best = Some((index as u32, value));
        }
    }
    best
}
