use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::reshard::ReshardError;

/// How transformer layers are split across pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMethod {
    /// Floor split of all structural layers, remainder spread over the
    /// trailing stages.
    Uniform,
    /// Weighted split: embedding, final norm and head weigh nothing, each
    /// transformer layer weighs one.
    Layer,
}

impl SegmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentMethod::Uniform => "uniform",
            SegmentMethod::Layer => "layer",
        }
    }
}

impl std::fmt::Display for SegmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural positions of a decoder LM checkpoint.
///
/// The canonical layer index is: embedding 0, transformer layer `i` at
/// `i + 1`, final norm at `n + 1`, LM head at `n + 2`, where `n` is the
/// transformer layer count.
#[derive(Debug, Clone)]
pub struct ModelLayout {
    prefix: String,
    layers_re: Regex,
}

impl ModelLayout {
    pub fn new(prefix: &str) -> Self {
        let escaped = regex::escape(prefix);
        let layers_re = Regex::new(&format!(r"^{}\.layers\.(\d+)", escaped))
            .expect("escaped prefix yields a valid pattern");
        Self {
            prefix: prefix.to_string(),
            layers_re,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn embed_name(&self) -> String {
        format!("{}.embed_tokens", self.prefix)
    }

    fn norm_name(&self) -> String {
        format!("{}.norm", self.prefix)
    }

    /// Extract the structural layer name a parameter belongs to, e.g.
    /// `model.layers.11.self_attn.q_proj.weight` -> `model.layers.11`.
    pub fn extract_layer_name(&self, param_name: &str) -> Option<String> {
        if let Some(m) = self.layers_re.find(param_name) {
            return Some(m.as_str().to_string());
        }
        for candidate in [self.embed_name(), self.norm_name(), "lm_head".to_string()] {
            if param_name.starts_with(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Canonical index of a structural layer.
    pub fn index_layer(
        &self,
        layer_name: &str,
        transformer_layer_num: usize,
    ) -> Result<usize, ReshardError> {
        if layer_name == self.embed_name() {
            return Ok(0);
        }
        if layer_name == self.norm_name() {
            return Ok(transformer_layer_num + 1);
        }
        if layer_name == "lm_head" {
            return Ok(transformer_layer_num + 2);
        }
        let caps = self
            .layers_re
            .captures(layer_name)
            .ok_or_else(|| ReshardError::UnknownLayer(layer_name.to_string()))?;
        let index: usize = caps[1]
            .parse()
            .map_err(|_| ReshardError::UnknownLayer(layer_name.to_string()))?;
        Ok(index + 1)
    }
}

/// Compute segment boundaries: `stage_num + 1` cumulative indices over
/// `layer_num` structural layers (transformer layers plus embedding, norm
/// and head).
pub fn segment_boundaries(
    layer_num: usize,
    stage_num: usize,
    method: SegmentMethod,
) -> Result<Vec<usize>, ReshardError> {
    if stage_num == 0 || layer_num < stage_num {
        return Err(ReshardError::InvalidLayout(format!(
            "cannot split {} layers over {} stages",
            layer_num, stage_num
        )));
    }
    let mut result = vec![0usize; stage_num + 1];
    match method {
        SegmentMethod::Uniform => {
            let part_size = layer_num / stage_num;
            let extra_layers = layer_num % stage_num;
            for i in 1..stage_num {
                let offset = if i > stage_num - extra_layers { 1 } else { 0 };
                result[i] = (result[i - 1] + part_size + offset).min(layer_num);
            }
        }
        SegmentMethod::Layer => {
            let transformer_layers = layer_num - 3;
            if transformer_layers < stage_num {
                return Err(ReshardError::InvalidLayout(format!(
                    "cannot split {} transformer layers over {} stages by weight",
                    transformer_layers, stage_num
                )));
            }
            // Embedding, final norm and head weigh 0; transformer layers 1.
            // The floor split leaves any remainder to the last stage.
            let part_size = transformer_layers / stage_num;
            let mut memory_counter = 0;
            let mut result_idx = 1;
            for idx in 0..layer_num {
                let weight = usize::from(idx >= 1 && idx < layer_num - 2);
                memory_counter += weight;
                if memory_counter == part_size && result_idx < stage_num {
                    result[result_idx] = idx + 1;
                    result_idx += 1;
                    memory_counter = 0;
                }
            }
        }
    }
    result[stage_num] = layer_num;
    Ok(result)
}

/// Assign `pp * vpp` consecutive segments to `pp` stages, interleaved:
/// segment `i` goes to stage `i % pp`.
pub fn assign_segments(boundaries: &[usize], pp_degree: usize) -> Vec<Vec<(usize, usize)>> {
    let stage_num = boundaries.len() - 1;
    let mut per_stage = vec![Vec::new(); pp_degree];
    for i in 0..stage_num {
        per_stage[i % pp_degree].push((boundaries[i], boundaries[i + 1]));
    }
    per_stage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_name_extraction() {
        let layout = ModelLayout::new("model");
        assert_eq!(
            layout.extract_layer_name("model.layers.11.self_attn.q_proj.weight"),
            Some("model.layers.11".to_string())
        );
        assert_eq!(
            layout.extract_layer_name("model.embed_tokens.weight"),
            Some("model.embed_tokens".to_string())
        );
        assert_eq!(
            layout.extract_layer_name("model.norm.weight"),
            Some("model.norm".to_string())
        );
        assert_eq!(
            layout.extract_layer_name("lm_head.weight"),
            Some("lm_head".to_string())
        );
        assert_eq!(layout.extract_layer_name("optimizer.state.step"), None);
    }

    #[test]
    fn custom_prefix_is_respected() {
        let layout = ModelLayout::new("gpt");
        assert_eq!(
            layout.extract_layer_name("gpt.layers.0.mlp.weight"),
            Some("gpt.layers.0".to_string())
        );
        assert_eq!(layout.extract_layer_name("model.layers.0.mlp.weight"), None);
    }

    #[test]
    fn canonical_layer_indexing() {
        let layout = ModelLayout::new("model");
        let n = 8;
        assert_eq!(layout.index_layer("model.embed_tokens", n).unwrap(), 0);
        assert_eq!(layout.index_layer("model.layers.0", n).unwrap(), 1);
        assert_eq!(layout.index_layer("model.layers.7", n).unwrap(), 8);
        assert_eq!(layout.index_layer("model.norm", n).unwrap(), 9);
        assert_eq!(layout.index_layer("lm_head", n).unwrap(), 10);
        assert!(layout.index_layer("something.else", n).is_err());
    }

    #[test]
    fn uniform_boundaries_spread_remainder_to_trailing_stages() {
        // 8 transformer layers + 3 structural = 11, over 4 stages.
        let bounds = segment_boundaries(11, 4, SegmentMethod::Uniform).unwrap();
        assert_eq!(bounds, vec![0, 2, 5, 8, 11]);

        let bounds = segment_boundaries(11, 2, SegmentMethod::Uniform).unwrap();
        assert_eq!(bounds, vec![0, 5, 11]);
    }

    #[test]
    fn layer_boundaries_ignore_zero_weight_layers() {
        // Embedding and the two output layers carry no weight, so the first
        // stage absorbs the embedding and the last absorbs norm and head.
        let bounds = segment_boundaries(11, 4, SegmentMethod::Layer).unwrap();
        assert_eq!(bounds, vec![0, 3, 5, 7, 11]);

        let bounds = segment_boundaries(11, 2, SegmentMethod::Layer).unwrap();
        assert_eq!(bounds, vec![0, 5, 11]);
    }

    #[test]
    fn layer_boundaries_let_last_stage_absorb_remainder() {
        // 5 transformer layers + 3 structural = 8, over 2 stages: the floor
        // split puts 2 weighted layers on stage 0 and the rest on stage 1.
        let bounds = segment_boundaries(8, 2, SegmentMethod::Layer).unwrap();
        assert_eq!(bounds, vec![0, 3, 8]);

        // 7 transformer layers + 3 = 10 over 4 stages: part size 1, trailing
        // stage takes the extra.
        let bounds = segment_boundaries(10, 4, SegmentMethod::Layer).unwrap();
        assert_eq!(bounds, vec![0, 2, 3, 4, 10]);
    }

    #[test]
    fn layer_boundaries_need_a_weighted_layer_per_stage() {
        // 2 transformer layers cannot feed 4 weighted stages.
        assert!(segment_boundaries(5, 4, SegmentMethod::Layer).is_err());
    }

    #[test]
    fn interleaved_assignment() {
        let bounds = segment_boundaries(11, 4, SegmentMethod::Layer).unwrap();
        let stages = assign_segments(&bounds, 2);
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0], vec![(0, 3), (5, 7)]);
        assert_eq!(stages[1], vec![(3, 5), (7, 11)]);
    }

    #[test]
    fn too_few_layers_is_rejected() {
        assert!(segment_boundaries(3, 4, SegmentMethod::Uniform).is_err());
    }
}
