//! # Parameter Collection
//!
//! The mutable parameter space a stage network is allocated into. Backed by
//! a candle [`VarMap`], so every layer created here is trainable by any
//! candle optimizer, and the whole space can be dumped to, or restored from,
//! a single safetensors blob.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::MutexGuard;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::rnn::{GRU, GRUConfig, LSTM, LSTMConfig, RNN};
use candle_nn::{Embedding, Init, Linear, VarBuilder, VarMap};
use safetensors::SafeTensors;
use tracing::debug;

use crate::catalog::RnnCell;
use crate::error::{Result, TwpipeError};

/// Shape description of an allocated layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSpec {
    Embedding {
        vocab: usize,
        dim: usize,
    },
    Recurrent {
        cell: RnnCell,
        input: usize,
        hidden: usize,
        layers: usize,
    },
    Linear {
        input: usize,
        output: usize,
    },
    /// Square matrix of CRF transition scores.
    Transitions {
        tags: usize,
    },
}

/// A stack of recurrent layers; layer `i + 1` consumes the hidden states of
/// layer `i`.
#[derive(Debug, Clone)]
pub struct RecurrentStack {
    cell: RnnCell,
    layers: Vec<RecurrentLayer>,
}

#[derive(Debug, Clone)]
enum RecurrentLayer {
    Gru(GRU),
    Lstm(LSTM),
}

impl RecurrentStack {
    pub fn cell(&self) -> RnnCell {
        self.cell
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Runs the stack over `input` of shape `(batch, seq_len, features)` and
    /// returns the top layer's hidden states, `(batch, seq_len, hidden)`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut xs = input.clone();
        for layer in &self.layers {
            let hs: Vec<Tensor> = match layer {
                RecurrentLayer::Gru(gru) => {
                    gru.seq(&xs)?.iter().map(|state| state.h().clone()).collect()
                }
                RecurrentLayer::Lstm(lstm) => {
                    lstm.seq(&xs)?.iter().map(|state| state.h().clone()).collect()
                }
            };
            // one (batch, hidden) state per step
            xs = Tensor::stack(&hs, 1)?;
        }
        Ok(xs)
    }
}

/// Owns the variables of one stage network.
pub struct ParameterCollection {
    varmap: VarMap,
    device: Device,
    dtype: DType,
    layers: Vec<(String, LayerSpec)>,
}

impl ParameterCollection {
    /// Creates an empty collection on `device`.
    pub fn new(device: Device) -> Self {
        Self {
            varmap: VarMap::new(),
            device,
            dtype: DType::F32,
            layers: Vec::new(),
        }
    }

    /// Creates an empty collection on the CPU.
    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Every trainable variable, for handing to an optimizer.
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn builder(&self, name: &str) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device).pp(name)
    }

    fn record(&mut self, name: &str, spec: LayerSpec) {
        debug!(layer = name, ?spec, "[params] allocated layer");
        self.layers.push((name.to_string(), spec));
    }

    /// Allocates a lookup table of `vocab` rows of width `dim`.
    pub fn embedding(&mut self, name: &str, vocab: usize, dim: usize) -> Result<Embedding> {
        let layer = candle_nn::embedding(vocab, dim, self.builder(name))?;
        self.record(name, LayerSpec::Embedding { vocab, dim });
        Ok(layer)
    }

    /// Allocates `layers` stacked recurrent layers of the given cell.
    pub fn recurrent(
        &mut self,
        name: &str,
        cell: RnnCell,
        input: usize,
        hidden: usize,
        layers: usize,
    ) -> Result<RecurrentStack> {
        let vb = self.builder(name);
        let mut stack = Vec::with_capacity(layers);
        for i in 0..layers {
            let in_dim = if i == 0 { input } else { hidden };
            let layer_vb = vb.pp(format!("l{i}"));
            stack.push(match cell {
                RnnCell::Gru => RecurrentLayer::Gru(candle_nn::rnn::gru(
                    in_dim,
                    hidden,
                    GRUConfig::default(),
                    layer_vb,
                )?),
                RnnCell::Lstm => RecurrentLayer::Lstm(candle_nn::rnn::lstm(
                    in_dim,
                    hidden,
                    LSTMConfig::default(),
                    layer_vb,
                )?),
            });
        }
        self.record(
            name,
            LayerSpec::Recurrent {
                cell,
                input,
                hidden,
                layers,
            },
        );
        Ok(RecurrentStack {
            cell,
            layers: stack,
        })
    }

    /// Allocates an affine map from `input` to `output` features.
    pub fn linear(&mut self, name: &str, input: usize, output: usize) -> Result<Linear> {
        let layer = candle_nn::linear(input, output, self.builder(name))?;
        self.record(name, LayerSpec::Linear { input, output });
        Ok(layer)
    }

    /// Allocates a zero-initialised `(tags, tags)` transition matrix.
    pub fn transitions(&mut self, name: &str, tags: usize) -> Result<Tensor> {
        let matrix = self
            .builder(name)
            .get_with_hints((tags, tags), "weight", Init::Const(0.))?;
        self.record(name, LayerSpec::Transitions { tags });
        Ok(matrix)
    }

    /// Layers in allocation order.
    pub fn layers(&self) -> &[(String, LayerSpec)] {
        &self.layers
    }

    fn vars(&self) -> Result<MutexGuard<'_, HashMap<String, Var>>> {
        self.varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("parameter map lock poisoned".into()).into())
    }

    /// Shape of every variable, keyed by its full name.
    pub fn shapes(&self) -> Result<BTreeMap<String, Vec<usize>>> {
        Ok(self
            .vars()?
            .iter()
            .map(|(name, var)| (name.clone(), var.dims().to_vec()))
            .collect())
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> Result<usize> {
        Ok(self.vars()?.values().map(|var| var.elem_count()).sum())
    }

    /// Serialises every variable into a safetensors blob.
    pub fn save_parameters(&self) -> Result<Vec<u8>> {
        let vars = self.vars()?;
        let tensors: BTreeMap<&str, &Tensor> = vars
            .iter()
            .map(|(name, var)| (name.as_str(), var.as_tensor()))
            .collect();
        Ok(safetensors::serialize(tensors, &None)?)
    }

    /// Overwrites every variable with the tensors of a blob produced by
    /// [`ParameterCollection::save_parameters`].
    ///
    /// The blob must hold exactly the allocated variables with exactly
    /// their shapes; `stage` names the artifact namespace in errors.
    pub fn load_parameters(&mut self, stage: &str, blob: &[u8]) -> Result<()> {
        let mut loaded = candle_core::safetensors::load_buffer(blob, &self.device)
            .map_err(|e| TwpipeError::corrupt(stage, format!("unreadable parameter blob: {e}")))?;

        let vars = self.vars()?;
        for (name, var) in vars.iter() {
            let tensor = loaded.remove(name).ok_or_else(|| {
                TwpipeError::corrupt(stage, format!("parameter {name:?} missing from blob"))
            })?;
            if tensor.dims() != var.dims() {
                return Err(TwpipeError::corrupt(
                    stage,
                    format!(
                        "parameter {name:?} has shape {:?}, network expects {:?}",
                        tensor.dims(),
                        var.dims()
                    ),
                ));
            }
            var.set(&tensor.to_dtype(var.dtype())?)?;
        }

        if let Some(extra) = loaded.keys().next() {
            return Err(TwpipeError::corrupt(
                stage,
                format!("blob carries parameter {extra:?} the network does not have"),
            ));
        }
        debug!(stage, tensors = vars.len(), "[params] loaded parameters");
        Ok(())
    }
}

impl fmt::Debug for ParameterCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterCollection")
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl Default for ParameterCollection {
    fn default() -> Self {
        Self::cpu()
    }
}

/// Total number of scalars a parameter blob holds, read from its header
/// without touching the tensor data.
pub fn blob_parameter_count(stage: &str, blob: &[u8]) -> Result<usize> {
    let (_, metadata) = SafeTensors::read_metadata(blob)
        .map_err(|e| TwpipeError::corrupt(stage, format!("unreadable parameter blob: {e}")))?;
    metadata
        .tensors()
        .values()
        .try_fold(0usize, |total, info| {
            let count = info.shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))?;
            total.checked_add(count)
        })
        .ok_or_else(|| TwpipeError::corrupt(stage, "parameter blob shapes overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_expected_shapes() {
        let mut params = ParameterCollection::cpu();
        params.embedding("emb", 50, 16).unwrap();
        params.recurrent("rnn", RnnCell::Lstm, 16, 32, 2).unwrap();
        params.linear("out", 32, 12).unwrap();
        params.transitions("crf", 12).unwrap();

        let shapes = params.shapes().unwrap();
        assert_eq!(shapes["emb.weight"], [50, 16]);
        assert_eq!(shapes["out.weight"], [12, 32]);
        assert_eq!(shapes["out.bias"], [12]);
        assert_eq!(shapes["crf.weight"], [12, 12]);
        assert!(shapes.keys().any(|k| k.starts_with("rnn.l0.")));
        assert!(shapes.keys().any(|k| k.starts_with("rnn.l1.")));
        assert!(!shapes.keys().any(|k| k.starts_with("rnn.l2.")));
        assert_eq!(params.layers().len(), 4);
    }

    #[test]
    fn recurrent_stack_output_shape() {
        let mut params = ParameterCollection::cpu();
        let stack = params.recurrent("rnn", RnnCell::Gru, 4, 6, 2).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.cell(), RnnCell::Gru);

        let input = Tensor::zeros((1, 5, 4), DType::F32, params.device()).unwrap();
        let output = stack.forward(&input).unwrap();
        assert_eq!(output.dims(), [1, 5, 6]);

        let mut params = ParameterCollection::cpu();
        let stack = params.recurrent("rnn", RnnCell::Lstm, 4, 6, 3).unwrap();
        let input = Tensor::zeros((2, 7, 4), DType::F32, params.device()).unwrap();
        assert_eq!(stack.forward(&input).unwrap().dims(), [2, 7, 6]);
    }

    #[test]
    fn blob_count_reads_header() {
        let mut params = ParameterCollection::cpu();
        params.linear("out", 3, 2).unwrap();
        params.embedding("emb", 5, 4).unwrap();
        let blob = params.save_parameters().unwrap();

        assert_eq!(blob_parameter_count("postagger", &blob).unwrap(), 8 + 20);
        assert_eq!(params.num_parameters().unwrap(), 28);
        assert!(matches!(
            blob_parameter_count("postagger", &[0u8; 8]),
            Err(TwpipeError::CorruptModelArtifact { .. })
        ));
    }

    #[test]
    fn parameters_round_trip() {
        let mut trained = ParameterCollection::cpu();
        trained.linear("out", 3, 2).unwrap();
        let blob = trained.save_parameters().unwrap();

        let mut fresh = ParameterCollection::cpu();
        fresh.linear("out", 3, 2).unwrap();
        fresh.load_parameters("postagger", &blob).unwrap();

        assert_eq!(fresh.save_parameters().unwrap(), blob);
    }

    #[test]
    fn shape_mismatch_is_corrupt() {
        let mut trained = ParameterCollection::cpu();
        trained.linear("out", 3, 2).unwrap();
        let blob = trained.save_parameters().unwrap();

        let mut fresh = ParameterCollection::cpu();
        fresh.linear("out", 4, 2).unwrap();
        let err = fresh.load_parameters("postagger", &blob).unwrap_err();
        assert!(matches!(err, TwpipeError::CorruptModelArtifact { .. }));
    }

    #[test]
    fn missing_and_extra_tensors_are_corrupt() {
        let mut trained = ParameterCollection::cpu();
        trained.linear("out", 3, 2).unwrap();
        trained.embedding("emb", 5, 3).unwrap();
        let blob = trained.save_parameters().unwrap();

        let mut smaller = ParameterCollection::cpu();
        smaller.linear("out", 3, 2).unwrap();
        assert!(matches!(
            smaller.load_parameters("postagger", &blob),
            Err(TwpipeError::CorruptModelArtifact { .. })
        ));

        let mut larger = ParameterCollection::cpu();
        larger.linear("out", 3, 2).unwrap();
        larger.embedding("emb", 5, 3).unwrap();
        larger.linear("extra", 3, 3).unwrap();
        assert!(matches!(
            larger.load_parameters("postagger", &blob),
            Err(TwpipeError::CorruptModelArtifact { .. })
        ));
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let mut trained = ParameterCollection::cpu();
        trained.linear("out", 3, 2).unwrap();
        let blob = trained.save_parameters().unwrap();

        let err = trained
            .load_parameters("postagger", &blob[..blob.len() / 2])
            .unwrap_err();
        assert!(matches!(err, TwpipeError::CorruptModelArtifact { .. }));
    }
}
