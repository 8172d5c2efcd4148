use crate::config::ModelSettings;
use crate::error::LoadError;
use crate::inference::Classifier;
use crate::nn::ArchitectureId;
use safetensors::tensor::{Dtype, SafeTensors};
use std::collections::BTreeMap;
use std::str::FromStr;

/// A single named parameter decoded from the checkpoint.
pub(crate) struct Tensor {
    pub(crate) shape: Vec<usize>,
    pub(crate) data: Vec<f32>,
}

/// The checkpoint's named-parameter map ("state map"). Transient: consumed by
/// architecture binding and dropped.
pub(crate) struct StateMap {
    tensors: BTreeMap<String, Tensor>,
}

impl StateMap {
    pub(crate) fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    fn from_safetensors(parsed: &SafeTensors<'_>) -> Result<Self, LoadError> {
        let mut tensors = BTreeMap::new();
        for (name, view) in parsed.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(LoadError::DeserializeFailed(format!(
                    "tensor `{}` has dtype {:?}, only F32 checkpoints are supported",
                    name,
                    view.dtype()
                )));
            }
            let data = view
                .data()
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();
            tensors.insert(
                name,
                Tensor {
                    shape: view.shape().to_vec(),
                    data,
                },
            );
        }

        Ok(Self { tensors })
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            tensors: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, name: String, tensor: Tensor) {
        self.tensors.insert(name, tensor);
    }
}

/// Turns raw checkpoint bytes into a ready classifier.
///
/// Two serialized shapes are recognized. A self-describing checkpoint carries
/// an `architecture` entry in its container metadata and is adopted as-is. A
/// bare state map carries no metadata and can only be consumed when the
/// operator has configured `model.architecture`; without it the parameter
/// shapes cannot be bound to a model graph and the load is rejected instead
/// of guessing.
pub fn deserialize(bytes: &[u8], settings: &ModelSettings) -> Result<Classifier, LoadError> {
    let (_, header) = SafeTensors::read_metadata(bytes).map_err(|e| {
        LoadError::DeserializeFailed(format!("not a recognized checkpoint format: {}", e))
    })?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let parsed = SafeTensors::deserialize(bytes)
        .map_err(|e| LoadError::DeserializeFailed(e.to_string()))?;
    let state_map = StateMap::from_safetensors(&parsed)?;

    let architecture = match metadata.get("architecture") {
        Some(name) => {
            tracing::info!(architecture = %name, "checkpoint names its own architecture");
            ArchitectureId::from_str(name).map_err(LoadError::DeserializeFailed)?
        }
        None => match &settings.architecture {
            Some(name) => ArchitectureId::from_str(name).map_err(LoadError::DeserializeFailed)?,
            None => {
                return Err(LoadError::AmbiguousCheckpoint(
                    "no architecture metadata and no model.architecture configured; \
                     set model.architecture so the parameter shapes can be bound to a model graph"
                        .into(),
                ))
            }
        },
    };

    let num_classes = match metadata.get("num_classes") {
        Some(raw) => raw.parse().map_err(|_| {
            LoadError::DeserializeFailed(format!("invalid num_classes metadata `{}`", raw))
        })?,
        None => settings.num_classes,
    };

    tracing::info!(
        architecture = architecture.as_str(),
        num_classes,
        strict = settings.strict_binding,
        "binding checkpoint parameters"
    );
    let bound = architecture.build(&state_map, num_classes, settings.strict_binding)?;

    Ok(Classifier::new(bound, num_classes))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::nn::Linear;
    use safetensors::tensor::{serialize, Dtype, TensorView};
    use std::collections::HashMap;

    fn le_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Serialized two-class linear checkpoint: zero weights, bias [1, 0].
    pub(crate) fn linear_checkpoint(
        key_prefix: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Vec<u8> {
        let weight = le_bytes(&vec![0.; 2 * Linear::IN_FEATURES]);
        let bias = le_bytes(&[1., 0.]);
        let tensors = vec![
            (
                format!("{}fc.weight", key_prefix),
                TensorView::new(Dtype::F32, vec![2, Linear::IN_FEATURES], &weight).unwrap(),
            ),
            (
                format!("{}fc.bias", key_prefix),
                TensorView::new(Dtype::F32, vec![2], &bias).unwrap(),
            ),
        ];

        serialize(tensors, &metadata).unwrap()
    }

    pub(crate) fn self_describing_metadata() -> Option<HashMap<String, String>> {
        Some(HashMap::from([
            ("architecture".to_string(), "linear".to_string()),
            ("num_classes".to_string(), "2".to_string()),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{linear_checkpoint, self_describing_metadata};
    use super::*;

    fn settings(architecture: Option<&str>, strict: bool) -> ModelSettings {
        ModelSettings {
            architecture: architecture.map(String::from),
            num_classes: 2,
            strict_binding: strict,
        }
    }

    #[test]
    fn garbage_bytes_are_not_a_checkpoint() {
        let err = deserialize(b"not a checkpoint", &settings(Some("linear"), true)).unwrap_err();

        assert!(matches!(err, LoadError::DeserializeFailed(_)));
    }

    #[test]
    fn state_map_without_selector_is_ambiguous() {
        let bytes = linear_checkpoint("", None);

        let err = deserialize(&bytes, &settings(None, true)).unwrap_err();

        assert!(matches!(err, LoadError::AmbiguousCheckpoint(ref m) if m.contains("model.architecture")));
    }

    #[test]
    fn state_map_with_selector_binds() {
        let bytes = linear_checkpoint("", None);

        let classifier = deserialize(&bytes, &settings(Some("linear"), true)).unwrap();

        assert_eq!(classifier.num_classes(), 2);
    }

    #[test]
    fn self_describing_checkpoint_needs_no_selector() {
        let bytes = linear_checkpoint("", self_describing_metadata());

        let classifier = deserialize(&bytes, &settings(None, true)).unwrap();

        assert_eq!(classifier.num_classes(), 2);
    }

    #[test]
    fn wrapper_prefixed_state_map_binds() {
        let bytes = linear_checkpoint("module.", None);

        assert!(deserialize(&bytes, &settings(Some("linear"), true)).is_ok());
    }

    #[test]
    fn unknown_metadata_architecture_is_rejected() {
        let metadata = Some(std::collections::HashMap::from([(
            "architecture".to_string(),
            "resnet152".to_string(),
        )]));
        let bytes = linear_checkpoint("", metadata);

        let err = deserialize(&bytes, &settings(None, true)).unwrap_err();

        assert!(matches!(err, LoadError::DeserializeFailed(ref m) if m.contains("resnet152")));
    }

    #[test]
    fn metadata_num_classes_overrides_configuration() {
        let bytes = linear_checkpoint("", self_describing_metadata());
        let mut config = settings(None, true);
        config.num_classes = 38;

        let classifier = deserialize(&bytes, &config).unwrap();

        assert_eq!(classifier.num_classes(), 2);
    }
}
