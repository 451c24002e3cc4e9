use std::collections::BTreeMap;

use crate::reshard::ReshardError;

/// Sublayer name prefixes a checkpoint's internal tensor names can start
/// with, in match priority order. Longer, more specific prefixes first.
const SUBLAYER_PREFIXES: &[&str] = &[
    "column_sequence_parallel_linear",
    "row_sequence_parallel_linear",
    "linear",
    "layer_norm",
    "embedding",
    "create_parameter",
    "lm_head",
];

fn sublayer_prefix(tensor_layer_name: &str) -> Option<&'static str> {
    SUBLAYER_PREFIXES
        .iter()
        .copied()
        .find(|prefix| tensor_layer_name.starts_with(prefix))
}

/// Per-sublayer-kind counter. A counter advances when the (structural layer,
/// old tensor layer name) pair changes, so a weight and its bias keep the
/// same index.
#[derive(Debug, Default)]
struct RenameScope {
    index: Option<usize>,
    last_key: Option<(String, String)>,
}

impl RenameScope {
    fn next_index(&mut self, layer_id: &str, old_layer_name: &str) -> usize {
        let key = (layer_id.to_string(), old_layer_name.to_string());
        if self.last_key.as_ref() != Some(&key) {
            self.index = Some(self.index.map_or(0, |i| i + 1));
            self.last_key = Some(key);
        }
        // set above on first use
        self.index.unwrap_or(0)
    }
}

/// Re-derives a stage's internal tensor names from scratch.
///
/// Tensor names inside a checkpoint shard are positional
/// (`linear_17.w_0`, `layer_norm_4.b_0`, ...). After moving layers to a new
/// stage the positions change, so every sublayer kind is renumbered in
/// first-seen order. Feeding the same sequence twice yields the same names.
#[derive(Debug, Default)]
pub struct LayerRenamer {
    scopes: BTreeMap<&'static str, RenameScope>,
}

impl LayerRenamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an old tensor name to its name in the destination stage,
    /// preserving the parameter suffix (`.w_0`, `.b_0`, ...).
    pub fn new_param_name(
        &mut self,
        layer_id: &str,
        old_name: &str,
    ) -> Result<String, ReshardError> {
        let (old_layer, suffix) = match old_name.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (old_name, None),
        };
        let prefix = sublayer_prefix(old_layer)
            .ok_or_else(|| ReshardError::UnknownSublayer(old_name.to_string()))?;
        let index = self
            .scopes
            .entry(prefix)
            .or_default()
            .next_index(layer_id, old_layer);
        let new_layer = format!("{}_{}", prefix, index);
        Ok(match suffix {
            Some(suffix) => format!("{}.{}", new_layer, suffix),
            None => new_layer,
        })
    }
}
