//! Length-normalised beam search.
//!
//! Every example starts from `beam_width` copies of the start-token prefix.
//! Step 0 expands only the first copy, so the initial beams are distinct.
//! A beam that has emitted the end token keeps stepping with the end token at
//! log-probability zero, which keeps it in the ranking without changing its
//! score. The search stops once every beam has finished or after `max_len`
//! steps, then ranks beams by `score / ((5 + len) / 6)^length_penalty`.

use std::cmp::Ordering;

use model::{SpecialTokens, Transformer};
use rayon::prelude::*;

use crate::{
    config::check_budget, BeamSearchConfig, DecodeError, MaxLengthPolicy, StepScorer,
    TransformerScorer,
};

/// A finished (or length-capped) output sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    /// Emitted ids without the start token, up to and including the end token.
    pub tokens: Vec<u32>,
    /// Cumulative log-probability.
    pub score: f32,
    /// `score` after [`length_normalized`]; greedy decoding applies no penalty
    /// and leaves it equal to `score`.
    pub normalized_score: f32,
    /// Whether the sequence ended with the end token rather than the length cap.
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeamSearchOutput {
    pub best: Hypothesis,
    /// Every final beam, best first.
    pub hypotheses: Vec<Hypothesis>,
}

/// `score / ((5 + len) / 6)^length_penalty`.
pub fn length_normalized(score: f32, len: usize, length_penalty: f32) -> f32 {
    let divisor = ((5.0 + len as f32) / 6.0).powf(length_penalty);
    score / divisor
}

#[derive(Debug, Clone)]
struct Beam {
    prefix: Vec<u32>,
    score: f32,
    finished: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    parent: usize,
    token: u32,
}

/// Higher score first, then lower parent, then lower token id.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.parent.cmp(&b.parent))
        .then(a.token.cmp(&b.token))
}

#[derive(Debug, Clone)]
pub struct BeamSearchDecoder {
    config: BeamSearchConfig,
    tokens: SpecialTokens,
}

impl BeamSearchDecoder {
    pub fn new(config: BeamSearchConfig, tokens: SpecialTokens) -> Result<Self, DecodeError> {
        config.validate()?;
        Ok(Self { config, tokens })
    }

    pub fn config(&self) -> &BeamSearchConfig {
        &self.config
    }

    pub fn tokens(&self) -> &SpecialTokens {
        &self.tokens
    }

    /// Decodes one source sentence with `model`.
    ///
    /// A source made only of padding (or no tokens at all) yields `[end]`
    /// without touching the model. `max_len` must leave room for the start
    /// token within the model's `max_seq_len`.
    pub fn decode(
        &self,
        model: &Transformer,
        source: &[u32],
        max_len: usize,
    ) -> Result<BeamSearchOutput, DecodeError> {
        check_budget(max_len, Some(model.config().max_seq_len))?;
        if source.iter().all(|&token| token == self.tokens.pad) {
            log::debug!("source has no content tokens; emitting end immediately");
            let best = Hypothesis {
                tokens: vec![self.tokens.end],
                score: 0.0,
                normalized_score: 0.0,
                finished: true,
            };
            return Ok(BeamSearchOutput {
                hypotheses: vec![best.clone()],
                best,
            });
        }
        let mut scorer = TransformerScorer::new(model, source)?;
        self.search(&mut scorer, max_len)
    }

    /// Decodes every source independently across the rayon pool.
    ///
    /// Each example gets its own budget from `policy`; results keep input order.
    pub fn decode_batch(
        &self,
        model: &Transformer,
        sources: &[Vec<u32>],
        policy: &MaxLengthPolicy,
    ) -> Result<Vec<BeamSearchOutput>, DecodeError> {
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

    /// Runs the search against any [`StepScorer`].
    pub fn search<S>(&self, scorer: &mut S, max_len: usize) -> Result<BeamSearchOutput, DecodeError>
    where
        S: StepScorer + ?Sized,
    {
        check_budget(max_len, None)?;
        let width = self.config.beam_width;
        let vocab = scorer.vocab_size();
        let end = self.tokens.end;
        if end as usize >= vocab {
            return Err(DecodeError::config(format!(
                "end token {end} is outside the vocabulary ({vocab})"
            )));
        }

        let mut beams = vec![
            Beam {
                prefix: vec![self.tokens.start],
                score: 0.0,
                finished: false,
            };
            width
        ];

        for step in 0..max_len {
            let expanded = if step == 0 { 1 } else { beams.len() };
            let active: Vec<usize> = (0..expanded).filter(|&i| !beams[i].finished).collect();
            let prefixes: Vec<Vec<u32>> = active.iter().map(|&i| beams[i].prefix.clone()).collect();
            let log_probs = scorer.log_probs(&prefixes)?;
            if log_probs.len() != active.len() {
                return Err(DecodeError::InvalidScores(format!(
                    "expected {} rows, got {}",
                    active.len(),
                    log_probs.len()
                )));
            }
            let mut rows: Vec<Option<&Vec<f32>>> = vec![None; expanded];
            for (&index, row) in active.iter().zip(&log_probs) {
                rows[index] = Some(row);
            }

            let mut candidates = Vec::with_capacity(expanded * width);
            for (parent, (beam, row)) in beams.iter().zip(rows).enumerate() {
                let row = match row {
                    Some(row) => row,
                    None => {
                        candidates.push(Candidate {
                            score: beam.score,
                            parent,
                            token: end,
                        });
                        continue;
                    }
                };
                if row.len() != vocab {
                    return Err(DecodeError::InvalidScores(format!(
                        "beam {parent} scored {} tokens, vocabulary has {vocab}",
                        row.len()
                    )));
                }
                if row.iter().any(|value| !value.is_finite()) {
                    return Err(DecodeError::NonFinite { step, beam: parent });
                }
                // No parent contributes more than `width` survivors.
                let mut local: Vec<Candidate> = row
                    .iter()
                    .enumerate()
                    .map(|(token, &log_prob)| Candidate {
                        score: beam.score + log_prob,
                        parent,
                        token: token as u32,
                    })
                    .collect();
                local.sort_by(rank);
                local.truncate(width);
                candidates.extend(local);
            }

            candidates.sort_by(rank);
            candidates.truncate(width);
            beams = candidates
                .iter()
                .map(|candidate| {
                    let parent = &beams[candidate.parent];
                    let mut prefix = parent.prefix.clone();
                    prefix.push(candidate.token);
                    Beam {
                        prefix,
                        score: candidate.score,
                        finished: parent.finished || candidate.token == end,
                    }
                })
                .collect();

            let live = beams.iter().filter(|beam| !beam.finished).count();
            log::debug!(
                "beam step {step}: {} beams, {live} active, best score {:.4}",
                beams.len(),
                beams.first().map_or(f32::NEG_INFINITY, |beam| beam.score)
            );
            if live == 0 {
                break;
            }
        }

        let output = self.finalize(&beams)?;
        log::info!(
            "beam search finished: {} tokens, score {:.4}, normalized {:.4}",
            output.best.tokens.len(),
            output.best.score,
            output.best.normalized_score
        );
        Ok(output)
    }

    fn finalize(&self, beams: &[Beam]) -> Result<BeamSearchOutput, DecodeError> {
        let end = self.tokens.end;
        let mut hypotheses: Vec<Hypothesis> = beams
            .iter()
            .map(|beam| {
                let emitted = &beam.prefix[1..];
                let tokens = match emitted.iter().position(|&token| token == end) {
                    Some(index) => emitted[..=index].to_vec(),
                    None => emitted.to_vec(),
                };
                Hypothesis {
                    normalized_score: length_normalized(
                        beam.score,
                        tokens.len(),
                        self.config.length_penalty,
                    ),
                    tokens,
                    score: beam.score,
                    finished: beam.finished,
                }
            })
            .collect();
        // Stable sort: equal normalised scores keep the lower beam index first.
        hypotheses.sort_by(|a, b| b.normalized_score.total_cmp(&a.normalized_score));
        let best = hypotheses
            .first()
            .cloned()
            .ok_or_else(|| DecodeError::InvalidScores("search produced no beams".into()))?;
        Ok(BeamSearchOutput { best, hypotheses })
    }
}
