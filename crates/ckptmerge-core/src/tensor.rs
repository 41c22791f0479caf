//! Dense host-resident tensors.
//!
//! A [`Tensor`] owns its elements as little-endian bytes tagged with a
//! [`Dtype`], the same layout safetensors uses on disk. Loading and saving
//! therefore never reinterpret memory; arithmetic decodes elements into a
//! wide compute type and encodes the result back into the storage dtype.

use half::{bf16, f16};

use crate::{CoreError, Dtype, Result};

/// A dense, row-major tensor stored as little-endian bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: Dtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    /// Create a tensor from raw little-endian bytes.
    ///
    /// Fails with [`CoreError::LengthMismatch`] when `data` does not hold
    /// exactly `numel * dtype.size_bytes()` bytes, and with
    /// [`CoreError::ShapeOverflow`] when that byte count exceeds `usize`.
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let expected = match checked_numel(&shape).and_then(|n| n.checked_mul(dtype.size_bytes())) {
            Some(expected) => expected,
            None => return Err(CoreError::ShapeOverflow { shape }),
        };
        if data.len() != expected {
            return Err(CoreError::LengthMismatch {
                dtype,
                shape,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self { dtype, shape, data })
    }

    /// Create a float32 tensor.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        Self::new(Dtype::Float32, shape, encode_f32(Dtype::Float32, values))
    }

    /// Create a tensor of any dtype from f64 values.
    ///
    /// Float dtypes round to the nearest representable value. Integer dtypes
    /// round to the nearest integer and saturate at the type bounds; `bool`
    /// stores any non-zero value as `true`.
    pub fn from_f64_values(dtype: Dtype, shape: Vec<usize>, values: &[f64]) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * dtype.size_bytes());
        for &v in values {
            encode_f64(dtype, v, &mut data);
        }
        Self::new(dtype, shape, data)
    }

    /// Element dtype.
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Tensor shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the element buffer in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Raw little-endian element bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decode every element to f32.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let size = self.dtype.size_bytes();
        self.data
            .chunks_exact(size)
            .map(|chunk| decode_f32(self.dtype, chunk))
            .collect()
    }

    /// Decode every element to f64.
    ///
    /// Exact for every dtype except int64 magnitudes above 2^53.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let size = self.dtype.size_bytes();
        self.data
            .chunks_exact(size)
            .map(|chunk| decode_f64(self.dtype, chunk))
            .collect()
    }

    /// Linear interpolation toward `other`: `(1 - alpha) * self + alpha * other`.
    ///
    /// Both tensors must share shape and dtype. The result keeps that dtype.
    /// Half-precision and float32 elements are combined in f32, float64 in
    /// f64. Integer and bool elements are combined in f64 and rounded back.
    pub fn lerp(&self, other: &Tensor, alpha: f32) -> Result<Tensor> {
        if self.shape != other.shape {
            return Err(CoreError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        if self.dtype != other.dtype {
            return Err(CoreError::DtypeMismatch {
                expected: self.dtype,
                actual: other.dtype,
            });
        }

        match self.dtype {
            Dtype::Float16 | Dtype::BFloat16 | Dtype::Float32 => {
                let keep = 1.0 - alpha;
                let values: Vec<f32> = self
                    .to_f32_vec()
                    .into_iter()
                    .zip(other.to_f32_vec())
                    .map(|(a, b)| keep * a + alpha * b)
                    .collect();
                Self::new(self.dtype, self.shape.clone(), encode_f32(self.dtype, &values))
            }
            _ => {
                let alpha = f64::from(alpha);
                let keep = 1.0 - alpha;
                let values: Vec<f64> = self
                    .to_f64_vec()
                    .into_iter()
                    .zip(other.to_f64_vec())
                    .map(|(a, b)| keep * a + alpha * b)
                    .collect();
                Self::from_f64_values(self.dtype, self.shape.clone(), &values)
            }
        }
    }
}

/// Number of elements in `shape`, or `None` if it does not fit in `usize`.
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

fn decode_f32(dtype: Dtype, chunk: &[u8]) -> f32 {
    match dtype {
        Dtype::Float16 => f16::from_le_bytes([chunk[0], chunk[1]]).to_f32(),
        Dtype::BFloat16 => bf16::from_le_bytes([chunk[0], chunk[1]]).to_f32(),
        Dtype::Float32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        _ => decode_f64(dtype, chunk) as f32,
    }
}

fn decode_f64(dtype: Dtype, chunk: &[u8]) -> f64 {
    match dtype {
        Dtype::Bool | Dtype::UInt8 => f64::from(chunk[0]),
        Dtype::Int8 => f64::from(chunk[0] as i8),
        Dtype::Int16 => f64::from(i16::from_le_bytes([chunk[0], chunk[1]])),
        Dtype::Int32 => f64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        Dtype::Int64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            i64::from_le_bytes(bytes) as f64
        }
        Dtype::Float64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        }
        Dtype::Float16 | Dtype::BFloat16 | Dtype::Float32 => f64::from(decode_f32(dtype, chunk)),
    }
}

fn encode_f32(dtype: Dtype, values: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * dtype.size_bytes());
    for &v in values {
        match dtype {
            Dtype::Float16 => data.extend_from_slice(&f16::from_f32(v).to_le_bytes()),
            Dtype::BFloat16 => data.extend_from_slice(&bf16::from_f32(v).to_le_bytes()),
            Dtype::Float32 => data.extend_from_slice(&v.to_le_bytes()),
            _ => encode_f64(dtype, f64::from(v), &mut data),
        }
    }
    data
}

// `as` casts from f64 saturate and map NaN to zero.
fn encode_f64(dtype: Dtype, v: f64, out: &mut Vec<u8>) {
    match dtype {
        Dtype::Bool => out.push(u8::from(v.round() != 0.0 && !v.is_nan())),
        Dtype::UInt8 => out.push(v.round() as u8),
        Dtype::Int8 => out.extend_from_slice(&(v.round() as i8).to_le_bytes()),
        Dtype::Int16 => out.extend_from_slice(&(v.round() as i16).to_le_bytes()),
        Dtype::Int32 => out.extend_from_slice(&(v.round() as i32).to_le_bytes()),
        Dtype::Int64 => out.extend_from_slice(&(v.round() as i64).to_le_bytes()),
        Dtype::Float16 => out.extend_from_slice(&f16::from_f64(v).to_le_bytes()),
        Dtype::BFloat16 => out.extend_from_slice(&bf16::from_f64(v).to_le_bytes()),
        Dtype::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
        Dtype::Float64 => out.extend_from_slice(&v.to_le_bytes()),
    }
}
