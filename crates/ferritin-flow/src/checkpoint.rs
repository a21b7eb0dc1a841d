//! Trained weights on disk and the key remapping needed before they back a model.
use crate::error::{FlowError, Result};
use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::path::Path;

const WRAPPER_PREFIX: &str = "vectorfield_network.";
const PARALLEL_PREFIX: &str = "module.";
const ESM_PREFIX: &str = "esm.";
const SEQ_ENCODER_PREFIX: &str = "seq_encoder.";

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub model: HashMap<String, Tensor>,
    /// Language model the weights were trained with, when recorded.
    pub esm_model: Option<String>,
}

impl Checkpoint {
    /// Metadata entry holding the language model name.
    pub const ESM_MODEL_METADATA: &'static str = "esm_model";

    pub fn from_safetensors<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let buffer = std::fs::read(path.as_ref())?;
        let (_, metadata) = SafeTensors::read_metadata(&buffer)?;
        let esm_model = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(Self::ESM_MODEL_METADATA).cloned());
        let model = candle_core::safetensors::load_buffer(&buffer, device)?;
        Ok(Self { model, esm_model })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let metadata = self
            .esm_model
            .as_ref()
            .map(|name| HashMap::from([(Self::ESM_MODEL_METADATA.to_string(), name.clone())]));
        safetensors::serialize_to_file(&self.model, &metadata, path.as_ref())?;
        Ok(())
    }

    /// Parameter names as the model expects them.
    ///
    /// Drops the training wrapper prefix, checks the language model version, strips a
    /// data-parallel `module.` prefix when every key carries one, then adds the language
    /// model's own `esm.*` parameters under `seq_encoder.`.
    pub fn remap(
        self,
        configured_esm_model: &str,
        esm_state_dict: HashMap<String, Tensor>,
    ) -> Result<HashMap<String, Tensor>> {
        if self.model.is_empty() {
            return Err(FlowError::EmptyCheckpoint);
        }
        let mut state: HashMap<String, Tensor> = self
            .model
            .into_iter()
            .map(|(k, v)| (k.replace(WRAPPER_PREFIX, ""), v))
            .collect();

        match self.esm_model {
            None => log::warn!(
                "checkpoint does not record its ESM model; the language model version cannot be verified"
            ),
            Some(name) if name != configured_esm_model => {
                return Err(FlowError::EsmVersionMismatch {
                    checkpoint: name,
                    configured: configured_esm_model.to_string(),
                })
            }
            Some(_) => {}
        }

        if state.keys().all(|k| k.starts_with(PARALLEL_PREFIX)) {
            state = state
                .into_iter()
                .map(|(k, v)| (k.replacen(PARALLEL_PREFIX, "", 1), v))
                .collect();
        }

        for (k, v) in esm_state_dict {
            if k.starts_with(ESM_PREFIX) {
                state.insert(format!("{SEQ_ENCODER_PREFIX}{k}"), v);
            }
        }
        Ok(state)
    }
}
