use std::sync::Arc;

use anyhow::Result;
use candle_core::{DType, Device, IndexOp, Tensor};
use layers::{LayerError, WeightMap};
use model::{ModelError, SpecialTokens, Transformer, TransformerConfig};

fn build_config() -> TransformerConfig {
    TransformerConfig {
        d_model: 16,
        n_heads: 4,
        n_layers: 2,
        d_ff: 32,
        dropout: 0.1,
        max_seq_len: 32,
        src_vocab_size: 20,
        tgt_vocab_size: 24,
        share_target_embeddings: false,
        norm_eps: 1e-5,
    }
}

fn build_model(config: TransformerConfig) -> Result<(Transformer, WeightMap)> {
    let mut weights = WeightMap::initialize(&Device::Cpu);
    let model = Transformer::new(config, SpecialTokens::default(), &mut weights)?;
    Ok((model, weights))
}

fn ids(data: &[u32], shape: (usize, usize)) -> Result<Tensor> {
    Ok(Tensor::from_slice(data, shape, &Device::Cpu)?)
}

fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?.abs()?.max_all()?.to_vec0::<f32>()?)
}

#[test]
fn length_one_target_yields_vocabulary_logits() -> Result<()> {
    let (model, _) = build_model(build_config())?;
    let src = ids(&[5, 17, 9, 0], (1, 4))?;
    let src_mask = model.source_mask(&src)?;
    let memory = model.encode(&src, Some(&src_mask))?;
    assert_eq!(memory.dims(), &[1, 4, 16]);

    let tgt = ids(&[1], (1, 1))?;
    let tgt_mask = model.target_mask(&tgt)?;
    let hidden = model.decode(&memory, Some(&src_mask), &tgt, Some(&tgt_mask))?;
    let logits = model.project(&hidden)?;
    assert_eq!(logits.dims(), &[1, 1, 24]);
    assert_eq!(logits.dtype(), DType::F32);
    Ok(())
}

#[test]
fn forward_matches_staged_calls() -> Result<()> {
    let (model, _) = build_model(build_config())?;
    let src = ids(&[3, 4, 5, 6, 7, 8, 0, 0], (2, 4))?;
    let tgt = ids(&[1, 9, 10, 1, 11, 0], (2, 3))?;
    let src_mask = model.source_mask(&src)?;
    let tgt_mask = model.target_mask(&tgt)?;

    let logits = model.forward(&src, &tgt, Some(&src_mask), Some(&tgt_mask))?;
    assert_eq!(logits.dims(), &[2, 3, 24]);

    let memory = model.encode(&src, Some(&src_mask))?;
    let hidden = model.decode(&memory, Some(&src_mask), &tgt, Some(&tgt_mask))?;
    assert!(max_diff(&logits, &model.project(&hidden)?)? < 1e-6);
    Ok(())
}

#[test]
fn decoder_positions_ignore_future_targets() -> Result<()> {
    let (model, _) = build_model(build_config())?;
    let src = ids(&[5, 17, 9, 3], (1, 4))?;
    let memory = model.encode(&src, None)?;

    let first = ids(&[1, 7, 8, 9], (1, 4))?;
    let second = ids(&[1, 7, 15, 4], (1, 4))?;
    let a = model.decode(&memory, None, &first, Some(&model.target_mask(&first)?))?;
    let b = model.decode(&memory, None, &second, Some(&model.target_mask(&second)?))?;
    assert!(max_diff(&a.i((.., 0..2, ..))?, &b.i((.., 0..2, ..))?)? < 1e-5);
    assert!(max_diff(&a.i((.., 2..4, ..))?, &b.i((.., 2..4, ..))?)? > 1e-4);
    Ok(())
}

#[test]
fn padded_source_positions_do_not_influence_decoding() -> Result<()> {
    let (model, _) = build_model(build_config())?;
    let tgt = ids(&[1, 6], (1, 2))?;
    let tgt_mask = model.target_mask(&tgt)?;

    let decode = |src: &Tensor, padding: &Tensor| -> Result<Tensor> {
        let memory = model.encode(src, Some(padding))?;
        Ok(model.decode(&memory, Some(padding), &tgt, Some(&tgt_mask))?)
    };

    // Same real tokens, different filler behind a mask that hides the last two keys.
    let src_a = ids(&[5, 17, 0, 0], (1, 4))?;
    let src_b = ids(&[5, 17, 12, 19], (1, 4))?;
    let mask = attention::masks::padding_mask_from_lengths(&Device::Cpu, &[2], 4)?;
    let a = decode(&src_a, &mask)?;
    let b = decode(&src_b, &mask)?;
    assert!(max_diff(&a, &b)? < 1e-5);
    Ok(())
}

#[test]
fn encoder_and_decoder_report_attention_weights() -> Result<()> {
    let (model, _) = build_model(build_config())?;
    let src = ids(&[5, 17, 9, 0], (1, 4))?;
    let src_mask = model.source_mask(&src)?;

    let embedded = Tensor::randn(0f32, 1.0, (1, 4, 16), &Device::Cpu)?;
    let (_, encoder_weights) = model
        .encoder()
        .forward_with_attention(&embedded, Some(&src_mask))?;
    assert_eq!(encoder_weights.len(), 2);
    for weights in &encoder_weights {
        assert_eq!(weights.dims(), &[1, 4, 4, 4]);
        let padded = weights.i((.., .., .., 3))?.max_all()?.to_vec0::<f32>()?;
        assert!(padded < 1e-6);
    }

    let memory = model.encode(&src, Some(&src_mask))?;
    let tgt_hidden = Tensor::randn(0f32, 1.0, (1, 3, 16), &Device::Cpu)?;
    let causal = attention::masks::build_causal_mask(&Device::Cpu, 3, 3)?;
    let (_, decoder_weights) = model.decoder().forward_with_attention(
        &tgt_hidden,
        &memory,
        Some(&src_mask),
        Some(&causal),
    )?;
    assert_eq!(decoder_weights.len(), 2);
    let layer = &decoder_weights[0];
    assert_eq!(layer.self_attn.dims(), &[1, 4, 3, 3]);
    assert_eq!(layer.cross_attn.dims(), &[1, 4, 3, 4]);
    let future = layer.self_attn.i((.., .., 0, 1..3))?.max_all()?.to_vec0::<f32>()?;
    assert!(future < 1e-6);
    Ok(())
}

#[test]
fn shared_target_embeddings_reuse_one_tensor() -> Result<()> {
    let mut config = build_config();
    config.share_target_embeddings = true;
    let (model, weights) = build_model(config)?;

    assert!(Arc::ptr_eq(
        model.generator().weight(),
        model.target_embedding().weight()
    ));
    assert!(weights.get("generator.weight").is_none());
    assert!(weights.get("generator.bias").is_some());

    let (unshared, _) = build_model(build_config())?;
    assert_eq!(
        unshared.parameter_count() - model.parameter_count(),
        24 * 16
    );
    Ok(())
}

#[test]
fn parameter_names_follow_module_hierarchy() -> Result<()> {
    let (model, _) = build_model(build_config())?;
    let names = model.parameter_names();
    for expected in [
        "src_embed.weight",
        "tgt_embed.weight",
        "encoder.layers.0.self_attn.q_proj.weight",
        "encoder.layers.1.feed_forward.w2.bias",
        "encoder.layers.1.ff_norm.weight",
        "encoder.norm.bias",
        "decoder.layers.0.cross_attn.out_proj.weight",
        "decoder.layers.1.cross_attn_norm.bias",
        "decoder.norm.weight",
        "generator.weight",
        "generator.bias",
    ] {
        assert!(names.iter().any(|name| name == expected), "missing {expected}");
    }
    // embeddings 2 + encoder 2 * 16 + 2 + decoder 2 * 26 + 2 + generator 2
    assert_eq!(names.len(), 2 + 2 * 16 + 2 + 2 * 26 + 2 + 2);
    Ok(())
}

#[test]
fn strict_checkpoint_round_trip_reproduces_logits() -> Result<()> {
    let (model, weights) = build_model(build_config())?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("model.safetensors");
    weights.save_safetensors(&path)?;

    let mut restored_weights = WeightMap::load_safetensors(&path, &Device::Cpu)?;
    let restored = Transformer::new(build_config(), SpecialTokens::default(), &mut restored_weights)?;

    let src = ids(&[5, 17, 9, 0], (1, 4))?;
    let tgt = ids(&[1, 4, 6], (1, 3))?;
    let src_mask = model.source_mask(&src)?;
    let tgt_mask = model.target_mask(&tgt)?;
    let a = model.forward(&src, &tgt, Some(&src_mask), Some(&tgt_mask))?;
    let b = restored.forward(&src, &tgt, Some(&src_mask), Some(&tgt_mask))?;
    assert!(max_diff(&a, &b)? < 1e-6);
    Ok(())
}

#[test]
fn strict_loading_reports_missing_unused_and_mis_shaped_parameters() -> Result<()> {
    let (_, weights) = build_model(build_config())?;
    let all: std::collections::HashMap<String, Tensor> = weights
        .names()
        .into_iter()
        .filter_map(|name| weights.get(&name).cloned().map(|t| (name, t)))
        .collect();

    let mut missing = all.clone();
    missing.remove("decoder.layers.1.cross_attn.v_proj.bias");
    let mut map = WeightMap::from_tensors(missing, &Device::Cpu)?;
    let err = Transformer::new(build_config(), SpecialTokens::default(), &mut map).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Attention(_) | ModelError::Layer(LayerError::MissingParameter(_))
    ));
    assert!(err.to_string().contains("decoder.layers.1.cross_attn.v_proj.bias"));

    let mut extra = all.clone();
    extra.insert("decoder.layers.2.ff_norm.weight".into(), Tensor::ones(16, DType::F32, &Device::Cpu)?);
    let mut map = WeightMap::from_tensors(extra, &Device::Cpu)?;
    let err = Transformer::new(build_config(), SpecialTokens::default(), &mut map).unwrap_err();
    assert!(matches!(err, ModelError::Layer(LayerError::UnusedParameters(ref names)) if names.len() == 1));

    let mut shared = build_config();
    shared.share_target_embeddings = true;
    let mut map = WeightMap::from_tensors(all.clone(), &Device::Cpu)?;
    let err = Transformer::new(shared, SpecialTokens::default(), &mut map).unwrap_err();
    assert!(err.to_string().contains("generator.weight"));

    let mut reshaped = all;
    reshaped.insert("src_embed.weight".into(), Tensor::zeros((19, 16), DType::F32, &Device::Cpu)?);
    let mut map = WeightMap::from_tensors(reshaped, &Device::Cpu)?;
    let err = Transformer::new(build_config(), SpecialTokens::default(), &mut map).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Layer(LayerError::ShapeMismatch { ref name, .. }) if name == "src_embed.weight"
    ));
    Ok(())
}

#[test]
fn invalid_configuration_fails_before_any_parameter_is_read() {
    let mut config = build_config();
    config.n_heads = 5;
    let mut weights = WeightMap::initialize(&Device::Cpu);
    let err = Transformer::new(config, SpecialTokens::default(), &mut weights).unwrap_err();
    assert!(matches!(err, ModelError::InvalidConfig(_)));
    assert!(weights.is_empty());
}

#[test]
fn sequences_longer_than_max_seq_len_are_rejected() -> Result<()> {
    let mut config = build_config();
    config.max_seq_len = 3;
    let (model, _) = build_model(config)?;
    let src = ids(&[5, 6, 7, 8], (1, 4))?;
    assert!(model.encode(&src, None).is_err());
    Ok(())
}

#[test]
fn inference_is_deterministic_and_training_mode_enables_dropout() -> Result<()> {
    let (model, _) = build_model(build_config())?;
    let src = ids(&[5, 17, 9, 3], (1, 4))?;
    let tgt = ids(&[1, 4, 6], (1, 3))?;
    let tgt_mask = model.target_mask(&tgt)?;

    let a = model.forward(&src, &tgt, None, Some(&tgt_mask))?;
    let b = model.forward(&src, &tgt, None, Some(&tgt_mask))?;
    assert_eq!(max_diff(&a, &b)?, 0.0);

    model.set_training(true);
    let c = model.forward(&src, &tgt, None, Some(&tgt_mask))?;
    model.set_training(false);
    assert!(max_diff(&a, &c)? > 0.0);
    let d = model.forward(&src, &tgt, None, Some(&tgt_mask))?;
    assert_eq!(max_diff(&a, &d)?, 0.0);
    Ok(())
}
