//! Checkpoint load and save.
//!
//! Two container encodings are supported, selected by file extension:
//!
//! - **Safetensors** (`.safetensors`): a flat name-to-tensor file.
//! - **State dict** (any other extension): a JSON document holding either a
//!   flat mapping or a mapping nested under `"state_dict"`. Loading unwraps
//!   the nested form transparently; saving always writes the nested form.
//!
//! Tensors in a state-dict document are `{ "dtype", "shape", "values" }`
//! objects where `values` is the flat row-major element list.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use ckptmerge_core::{checked_numel, CoreError, Device, Dtype, Tensor};
use indexmap::IndexMap;
use safetensors::tensor::TensorView;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use tracing::{debug, info};

use crate::{MergeError, Result, WeightMap};

/// On-disk checkpoint container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// Flat safetensors file.
    Safetensors,
    /// JSON state-dict document.
    StateDict,
}

impl CheckpointFormat {
    /// Pick the container for `path` from its extension.
    ///
    /// The match is case-insensitive, so `X.SAFETENSORS` is a safetensors
    /// file, while a file named just `.safetensors` has no extension and is
    /// read as a state dict.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("safetensors") => Self::Safetensors,
            _ => Self::StateDict,
        }
    }

    /// Container name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Safetensors => "safetensors",
            Self::StateDict => "state_dict",
        }
    }

    /// Read a checkpoint in this container onto `device`.
    pub fn load(&self, path: &Path, device: Device) -> Result<WeightMap> {
        debug!("Reading {} checkpoint {:?} onto {}", self.name(), path, device);
        let data = fs::read(path)?;
        match self {
            Self::Safetensors => decode_safetensors(&data),
            Self::StateDict => decode_state_dict(&data),
        }
    }

    /// Write a checkpoint in this container.
    pub fn save(&self, weights: &WeightMap, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        match self {
            Self::Safetensors => save_safetensors(weights, path),
            Self::StateDict => save_state_dict(weights, path),
        }
    }
}

/// Load a checkpoint, choosing the container from the extension.
pub fn load_weights(path: impl AsRef<Path>, device: Device) -> Result<WeightMap> {
    let path = path.as_ref();
    let format = CheckpointFormat::from_path(path);
    let weights = format.load(path, device)?;
    info!("Loaded {} tensors from {:?} ({})", weights.len(), path, format.name());
    Ok(weights)
}

/// Save a checkpoint, choosing the container from the extension.
pub fn save_weights(weights: &WeightMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let format = CheckpointFormat::from_path(path);
    format.save(weights, path)?;
    info!("Wrote {} tensors to {:?} ({})", weights.len(), path, format.name());
    Ok(())
}

// =============================================================================
// Safetensors
// =============================================================================

fn decode_safetensors(data: &[u8]) -> Result<WeightMap> {
    let tensors = SafeTensors::deserialize(data)?;

    // Header order is not preserved by the parser; sort for determinism.
    let mut entries = tensors.tensors();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut weights = WeightMap::with_capacity(entries.len());
    for (name, view) in entries {
        let dtype = dtype_from_safetensors(view.dtype(), &name)?;
        let tensor = Tensor::new(dtype, view.shape().to_vec(), view.data().to_vec())?;
        weights.insert(name, tensor);
    }

    Ok(weights)
}

fn save_safetensors(weights: &WeightMap, path: &Path) -> Result<()> {
    let views = weights
        .iter()
        .map(|(name, tensor)| {
            let view = TensorView::new(
                dtype_to_safetensors(tensor.dtype()),
                tensor.shape().to_vec(),
                tensor.as_bytes(),
            )?;
            Ok((name.as_str(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    safetensors::serialize_to_file(views, &None, path)?;
    Ok(())
}

fn dtype_from_safetensors(dtype: safetensors::Dtype, name: &str) -> Result<Dtype> {
    Ok(match dtype {
        safetensors::Dtype::BOOL => Dtype::Bool,
        safetensors::Dtype::U8 => Dtype::UInt8,
        safetensors::Dtype::I8 => Dtype::Int8,
        safetensors::Dtype::I16 => Dtype::Int16,
        safetensors::Dtype::I32 => Dtype::Int32,
        safetensors::Dtype::I64 => Dtype::Int64,
        safetensors::Dtype::F16 => Dtype::Float16,
        safetensors::Dtype::BF16 => Dtype::BFloat16,
        safetensors::Dtype::F32 => Dtype::Float32,
        safetensors::Dtype::F64 => Dtype::Float64,
        other => {
            return Err(CoreError::UnsupportedDtype(format!("{:?} for tensor {}", other, name)).into());
        }
    })
}

fn dtype_to_safetensors(dtype: Dtype) -> safetensors::Dtype {
    match dtype {
        Dtype::Bool => safetensors::Dtype::BOOL,
        Dtype::UInt8 => safetensors::Dtype::U8,
        Dtype::Int8 => safetensors::Dtype::I8,
        Dtype::Int16 => safetensors::Dtype::I16,
        Dtype::Int32 => safetensors::Dtype::I32,
        Dtype::Int64 => safetensors::Dtype::I64,
        Dtype::Float16 => safetensors::Dtype::F16,
        Dtype::BFloat16 => safetensors::Dtype::BF16,
        Dtype::Float32 => safetensors::Dtype::F32,
        Dtype::Float64 => safetensors::Dtype::F64,
    }
}

// =============================================================================
// State dict
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StoredTensor {
    dtype: Dtype,
    shape: Vec<usize>,
    values: Vec<Number>,
}

/// A wrapped document may carry other top-level fields (epoch, step
/// counters); they are ignored.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateDictDocument {
    Wrapped {
        state_dict: IndexMap<String, StoredTensor>,
    },
    Flat(IndexMap<String, StoredTensor>),
}

#[derive(Serialize)]
struct WrappedStateDict<'a> {
    state_dict: IndexMap<&'a str, StoredTensor>,
}

fn decode_state_dict(data: &[u8]) -> Result<WeightMap> {
    let stored = match serde_json::from_slice::<StateDictDocument>(data)? {
        StateDictDocument::Wrapped { state_dict } => {
            debug!("Unwrapping nested state_dict");
            state_dict
        }
        StateDictDocument::Flat(tensors) => tensors,
    };

    stored
        .into_iter()
        .map(|(name, tensor)| {
            let tensor = tensor_from_stored(&name, tensor)?;
            Ok((name, tensor))
        })
        .collect()
}

fn save_state_dict(weights: &WeightMap, path: &Path) -> Result<()> {
    let state_dict = weights
        .iter()
        .map(|(name, tensor)| Ok((name.as_str(), tensor_to_stored(name, tensor)?)))
        .collect::<Result<IndexMap<_, _>>>()?;

    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer(&mut writer, &WrappedStateDict { state_dict })?;
    writer.flush()?;
    Ok(())
}

fn tensor_to_stored(name: &str, tensor: &Tensor) -> Result<StoredTensor> {
    let values: Vec<Number> = match tensor.dtype() {
        // Decoded from bytes so magnitudes above 2^53 survive.
        Dtype::Int64 => tensor
            .as_bytes()
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                Number::from(i64::from_le_bytes(bytes))
            })
            .collect(),
        dtype if dtype.is_float() => tensor
            .to_f64_vec()
            .into_iter()
            .map(|v| {
                Number::from_f64(v).ok_or_else(|| {
                    MergeError::ModelSave(format!(
                        "tensor {} holds a non-finite value ({}) that JSON cannot represent",
                        name, v
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        _ => tensor
            .to_f64_vec()
            .into_iter()
            .map(|v| Number::from(v as i64))
            .collect(),
    };

    Ok(StoredTensor {
        dtype: tensor.dtype(),
        shape: tensor.shape().to_vec(),
        values,
    })
}

fn tensor_from_stored(name: &str, stored: StoredTensor) -> Result<Tensor> {
    let StoredTensor {
        dtype,
        shape,
        values,
    } = stored;

    let numel = checked_numel(&shape).ok_or_else(|| {
        MergeError::ModelLoad(format!(
            "tensor {} declares shape {:?} whose element count overflows",
            name, shape
        ))
    })?;
    if values.len() != numel {
        return Err(MergeError::ModelLoad(format!(
            "tensor {} declares shape {:?} ({} elements) but holds {} values",
            name,
            shape,
            numel,
            values.len()
        )));
    }

    let not_integer = |n: &Number| {
        MergeError::ModelLoad(format!("tensor {} ({}) holds non-integer value {}", name, dtype, n))
    };

    match dtype {
        Dtype::Int64 => {
            let mut data = Vec::with_capacity(numel * 8);
            for n in &values {
                let v = n.as_i64().ok_or_else(|| not_integer(n))?;
                data.extend_from_slice(&v.to_le_bytes());
            }
            Ok(Tensor::new(dtype, shape, data)?)
        }
        dtype if dtype.is_float() => {
            let floats = values
                .iter()
                .map(|n| {
                    n.as_f64().ok_or_else(|| {
                        MergeError::ModelLoad(format!("tensor {} holds invalid value {}", name, n))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Tensor::from_f64_values(dtype, shape, &floats)?)
        }
        _ => {
            let ints = values
                .iter()
                .map(|n| n.as_i64().map(|v| v as f64).ok_or_else(|| not_integer(n)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Tensor::from_f64_values(dtype, shape, &ints)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CheckpointFormat::from_path("a/b.safetensors"), CheckpointFormat::Safetensors);
        assert_eq!(CheckpointFormat::from_path("B.SAFETENSORS"), CheckpointFormat::Safetensors);
        assert_eq!(CheckpointFormat::from_path("model.ckpt"), CheckpointFormat::StateDict);
        assert_eq!(CheckpointFormat::from_path("model.pt"), CheckpointFormat::StateDict);
        assert_eq!(CheckpointFormat::from_path("safetensors"), CheckpointFormat::StateDict);
        assert_eq!(CheckpointFormat::from_path("dir/.safetensors"), CheckpointFormat::StateDict);
    }

    #[test]
    fn test_decode_flat_state_dict() {
        let json = br#"{
            "model.w": {"dtype": "float32", "shape": [2], "values": [1.5, -2.0]},
            "model.ids": {"dtype": "int64", "shape": [1, 2], "values": [0, 9007199254740993]}
        }"#;

        let weights = decode_state_dict(json).unwrap();
        assert_eq!(weights.len(), 2);
        assert_eq!(weights["model.w"].to_f32_vec(), vec![1.5, -2.0]);

        let ids = &weights["model.ids"];
        assert_eq!(ids.shape(), &[1, 2]);
        assert_eq!(&ids.as_bytes()[8..], &9_007_199_254_740_993_i64.to_le_bytes());
    }

    #[test]
    fn test_decode_wrapped_state_dict_ignores_extra_fields() {
        let json = br#"{
            "epoch": 6,
            "global_step": 470000,
            "state_dict": {
                "model.w": {"dtype": "float16", "shape": [], "values": [0.5]}
            }
        }"#;

        let weights = decode_state_dict(json).unwrap();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights["model.w"].dtype(), Dtype::Float16);
        assert_eq!(weights["model.w"].to_f32_vec(), vec![0.5]);
    }

    #[test]
    fn test_decode_rejects_value_count_mismatch() {
        let json = br#"{"model.w": {"dtype": "float32", "shape": [3], "values": [1.0]}}"#;
        assert!(matches!(decode_state_dict(json), Err(MergeError::ModelLoad(_))));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_decode_rejects_overflowing_shape() {
        let json = br#"{"model.w": {"dtype": "float32", "shape": [4294967296, 4294967296], "values": []}}"#;
        let err = decode_state_dict(json).unwrap_err();
        assert!(matches!(err, MergeError::ModelLoad(_)));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_decode_rejects_fractional_integer() {
        let json = br#"{"ids": {"dtype": "int32", "shape": [1], "values": [1.5]}}"#;
        assert!(matches!(decode_state_dict(json), Err(MergeError::ModelLoad(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_document() {
        assert!(matches!(decode_state_dict(b"not json"), Err(MergeError::Serde(_))));
        assert!(matches!(decode_state_dict(b"[1, 2, 3]"), Err(MergeError::Serde(_))));
    }

    #[test]
    fn test_decode_rejects_garbage_safetensors() {
        assert!(matches!(
            decode_safetensors(b"\x01\x02\x03"),
            Err(MergeError::Safetensors(_))
        ));
    }

    #[test]
    fn test_state_dict_rejects_non_finite_on_save() {
        let tensor = Tensor::from_f32(vec![2], &[1.0, f32::NAN]).unwrap();
        assert!(matches!(
            tensor_to_stored("model.w", &tensor),
            Err(MergeError::ModelSave(_))
        ));
    }

    #[test]
    fn test_dtype_mapping_is_symmetric() {
        for dtype in [
            Dtype::Bool,
            Dtype::UInt8,
            Dtype::Int8,
            Dtype::Int16,
            Dtype::Int32,
            Dtype::Int64,
            Dtype::Float16,
            Dtype::BFloat16,
            Dtype::Float32,
            Dtype::Float64,
        ] {
            let st = dtype_to_safetensors(dtype);
            assert_eq!(dtype_from_safetensors(st, "t").unwrap(), dtype);
        }
    }

    #[test]
    fn test_unsupported_safetensors_dtype() {
        let err = dtype_from_safetensors(safetensors::Dtype::U64, "model.w").unwrap_err();
        assert!(err.to_string().contains("model.w"));
        assert!(matches!(err, MergeError::Tensor(CoreError::UnsupportedDtype(_))));
    }
}
