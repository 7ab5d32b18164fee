//! Pooling of token embeddings into a sentence vector.

/// Mean over the tokens whose attention mask is set.
///
/// `hidden` is a row-major `[seq_len, hidden_size]` buffer. Falls back to an
/// unmasked mean when the mask selects nothing.
pub fn mean_pool(hidden: &[f32], hidden_size: usize, attention_mask: &[i64]) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_size];
    if hidden_size == 0 {
        return pooled;
    }

    let seq_len = hidden.len() / hidden_size;
    let selected = |j: usize| attention_mask.get(j).map_or(true, |&m| m != 0);
    let mut count = (0..seq_len).filter(|&j| selected(j)).count();
    let use_mask = count > 0;
    if !use_mask {
        count = seq_len;
    }

    for (j, token) in hidden.chunks_exact(hidden_size).enumerate() {
        if use_mask && !selected(j) {
            continue;
        }
        for (acc, value) in pooled.iter_mut().zip(token) {
            *acc += value;
        }
    }

    if count > 0 {
        let n = count as f32;
        pooled.iter_mut().for_each(|x| *x /= n);
    }
    pooled
}

/// Normalize a vector in-place to unit length.
pub fn normalize_inplace(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}
