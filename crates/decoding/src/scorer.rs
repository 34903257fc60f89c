use candle_core::{DType, Tensor, D};
use model::Transformer;

use crate::DecodeError;

/// One decoding step: next-token log-probabilities for every live prefix.
///
/// All prefixes passed in a call have the same length and start with the
/// start token. The result holds one row of `vocab_size()` values per prefix,
/// in the order given.
pub trait StepScorer {
    fn vocab_size(&self) -> usize;

    fn log_probs(&mut self, prefixes: &[Vec<u32>]) -> Result<Vec<Vec<f32>>, DecodeError>;
}

/// [`StepScorer`] over a [`Transformer`] for a single source sentence.
///
/// The source is encoded once at construction; every step replicates the
/// memory and source mask across the prefixes it is asked to score and
/// re-decodes the full prefixes.
pub struct TransformerScorer<'m> {
    model: &'m Transformer,
    memory: Tensor,
    src_mask: Tensor,
}

impl<'m> TransformerScorer<'m> {
    pub fn new(model: &'m Transformer, source: &[u32]) -> Result<Self, DecodeError> {
        if source.is_empty() {
            return Err(DecodeError::config("cannot encode an empty source"));
        }
        let src = Tensor::from_slice(source, (1, source.len()), model.device())?;
        let src_mask = model.source_mask(&src)?;
        let memory = model.encode(&src, Some(&src_mask))?;
        Ok(Self {
            model,
            memory,
            src_mask,
        })
    }

    /// Encoder output `(1, src_len, d_model)` shared by every step.
    pub fn memory(&self) -> &Tensor {
        &self.memory
    }
}

impl StepScorer for TransformerScorer<'_> {
    fn vocab_size(&self) -> usize {
        self.model.config().tgt_vocab_size
    }

    fn log_probs(&mut self, prefixes: &[Vec<u32>]) -> Result<Vec<Vec<f32>>, DecodeError> {
        let rows = prefixes.len();
        let prefix_len = match prefixes.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return Err(DecodeError::InvalidScores("no prefixes to score".into())),
        };
        if prefixes.iter().any(|prefix| prefix.len() != prefix_len) {
            return Err(DecodeError::InvalidScores(
                "prefixes must share one length".into(),
            ));
        }

        let flat: Vec<u32> = prefixes.iter().flatten().copied().collect();
        let tgt = Tensor::from_vec(flat, (rows, prefix_len), self.model.device())?;
        let tgt_mask = self.model.target_mask(&tgt)?;
        let memory = self.memory.repeat((rows, 1, 1))?;
        let src_mask = self.src_mask.repeat((rows, 1, 1, 1))?;

        let hidden = self
            .model
            .decode(&memory, Some(&src_mask), &tgt, Some(&tgt_mask))?;
        let last = hidden.narrow(1, prefix_len - 1, 1)?;
        let logits = self.model.project(&last)?.squeeze(1)?;
        let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
        Ok(log_probs.to_vec2::<f32>()?)
    }
}
