// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type.

use crate::{DType, Shape, TensorError};
use half::{bf16, f16};

/// An owned, n-dimensional tensor stored in contiguous memory.
///
/// # Memory Layout
/// Data is stored in row-major (C) order as a flat little-endian byte
/// buffer. Typed access goes through decoding helpers such as
/// [`to_f64_vec`](Tensor::to_f64_vec) and [`to_i64_vec`](Tensor::to_i64_vec),
/// which never reinterpret the byte buffer in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.size_bytes(), 24); // 2 * 3 * 4 bytes
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let size = shape.size_bytes(dtype);
        Self {
            shape,
            dtype,
            data: vec![0u8; size],
        }
    }

    /// Creates a tensor from raw little-endian bytes.
    ///
    /// Returns an error if the buffer size does not match `shape.size_bytes(dtype)`.
    pub fn from_bytes(shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, dtype, data })
    }

    /// Creates an `F32` tensor from a slice of values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.to_f32_vec(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        check_len(&shape, values.len(), DType::F32)?;
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Ok(Self {
            shape,
            dtype: DType::F32,
            data,
        })
    }

    /// Creates an `I64` tensor from a slice of values.
    pub fn from_i64(shape: Shape, values: &[i64]) -> Result<Self, TensorError> {
        check_len(&shape, values.len(), DType::I64)?;
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Ok(Self {
            shape,
            dtype: DType::I64,
            data,
        })
    }

    /// Creates a tensor of any dtype from `i64` values. Integer targets
    /// wrap to their width without a floating point round trip.
    pub fn from_integers(shape: Shape, dtype: DType, values: &[i64]) -> Result<Self, TensorError> {
        check_len(&shape, values.len(), dtype)?;
        let mut data = Vec::with_capacity(values.len() * dtype.size_bytes());
        for &v in values {
            match dtype {
                DType::I64 => data.extend_from_slice(&v.to_le_bytes()),
                DType::I32 => data.extend_from_slice(&(v as i32).to_le_bytes()),
                DType::I8 => data.extend_from_slice(&(v as i8).to_le_bytes()),
                DType::U8 => data.push(v as u8),
                _ => encode(dtype, v as f64, &mut data),
            }
        }
        Ok(Self { shape, dtype, data })
    }

    /// Creates a tensor of any dtype from `f64` values, converting each
    /// element to the target type (floats round, integers truncate toward
    /// zero and saturate, bools test for non-zero).
    pub fn from_f64(shape: Shape, dtype: DType, values: &[f64]) -> Result<Self, TensorError> {
        check_len(&shape, values.len(), dtype)?;
        let mut data = Vec::with_capacity(values.len() * dtype.size_bytes());
        for &v in values {
            encode(dtype, v, &mut data);
        }
        Ok(Self { shape, dtype, data })
    }

    /// Creates a rank-0 tensor holding a single value.
    pub fn scalar(dtype: DType, value: f64) -> Self {
        let mut data = Vec::with_capacity(dtype.size_bytes());
        encode(dtype, value, &mut data);
        Self {
            shape: Shape::scalar(),
            dtype,
            data,
        }
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Returns the raw byte slice backing this tensor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the memory footprint of this tensor in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Returns the same data viewed with a different shape of equal size.
    pub fn reshaped(&self, shape: Shape) -> Result<Tensor, TensorError> {
        if shape.num_elements() != self.num_elements() {
            return Err(TensorError::ShapeMismatch {
                op: "reshape",
                lhs: self.shape.clone(),
                rhs: shape,
            });
        }
        Ok(Tensor {
            shape,
            dtype: self.dtype,
            data: self.data.clone(),
        })
    }

    /// Decodes every element as `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let width = self.dtype.size_bytes();
        self.data
            .chunks_exact(width)
            .map(|b| decode(self.dtype, b))
            .collect()
    }

    /// Decodes every element as `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.to_f64_vec().into_iter().map(|v| v as f32).collect()
    }

    /// Decodes every element as `i64` without a floating point round trip.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        match self.dtype {
            DType::I64 => self
                .data
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            DType::I32 => self
                .data
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
                .collect(),
            _ => self.to_f64_vec().into_iter().map(|v| v as i64).collect(),
        }
    }

    /// Converts the tensor to another element type.
    pub fn cast(&self, dtype: DType) -> Tensor {
        if dtype == self.dtype {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.num_elements() * dtype.size_bytes());
        if dtype == DType::I64 || dtype == DType::I32 {
            for v in self.to_i64_vec() {
                match dtype {
                    DType::I64 => data.extend_from_slice(&v.to_le_bytes()),
                    _ => data.extend_from_slice(&(v as i32).to_le_bytes()),
                }
            }
        } else {
            for v in self.to_f64_vec() {
                encode(dtype, v, &mut data);
            }
        }
        Tensor {
            shape: self.shape.clone(),
            dtype,
            data,
        }
    }

    /// Like [`cast`](Self::cast), but finite values outside the target's
    /// range clamp to its largest finite magnitude instead of becoming
    /// infinite. Returns the converted tensor and how many values clamped.
    pub fn cast_saturating(&self, dtype: DType) -> (Tensor, usize) {
        let limit = match dtype {
            DType::F16 => f64::from(f16::MAX),
            DType::BF16 => f64::from(bf16::MAX),
            DType::F32 => f64::from(f32::MAX),
            _ => return (self.cast(dtype), 0),
        };
        if dtype == self.dtype {
            return (self.clone(), 0);
        }
        let mut clamped = 0;
        let mut data = Vec::with_capacity(self.num_elements() * dtype.size_bytes());
        for v in self.to_f64_vec() {
            let v = if v.is_finite() && v.abs() > limit {
                clamped += 1;
                limit.copysign(v)
            } else {
                v
            };
            encode(dtype, v, &mut data);
        }
        let tensor = Tensor {
            shape: self.shape.clone(),
            dtype,
            data,
        };
        (tensor, clamped)
    }

    /// Returns the element at `index` (row-major flat index) as `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        let width = self.dtype.size_bytes();
        let start = index.checked_mul(width)?;
        self.data
            .get(start..start + width)
            .map(|b| decode(self.dtype, b))
    }

    /// Returns `true` if every element equals `value`.
    pub fn all_equal(&self, value: f64) -> bool {
        self.to_f64_vec().iter().all(|&v| v == value)
    }
}

fn check_len(shape: &Shape, len: usize, dtype: DType) -> Result<(), TensorError> {
    let expected_elements = shape.num_elements();
    if len != expected_elements {
        return Err(TensorError::BufferSizeMismatch {
            expected: expected_elements * dtype.size_bytes(),
            actual: len * dtype.size_bytes(),
        });
    }
    Ok(())
}

fn encode(dtype: DType, v: f64, out: &mut Vec<u8>) {
    match dtype {
        DType::F32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
        DType::F16 => out.extend_from_slice(&f16::from_f64(v).to_le_bytes()),
        DType::BF16 => out.extend_from_slice(&bf16::from_f64(v).to_le_bytes()),
        DType::F64 => out.extend_from_slice(&v.to_le_bytes()),
        DType::I64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
        DType::I32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
        DType::I8 => out.push((v as i8) as u8),
        DType::U8 => out.push(v as u8),
        DType::Bool => out.push(u8::from(v != 0.0)),
    }
}

fn decode(dtype: DType, b: &[u8]) -> f64 {
    match dtype {
        DType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
        DType::F16 => f16::from_le_bytes([b[0], b[1]]).to_f64(),
        DType::BF16 => bf16::from_le_bytes([b[0], b[1]]).to_f64(),
        DType::F64 => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        DType::I64 => i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64,
        DType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
        DType::I8 => (b[0] as i8) as f64,
        DType::U8 => b[0] as f64,
        DType::Bool => f64::from(u8::from(b[0] != 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        assert_eq!(t.size_bytes(), 24);
        assert_eq!(t.shape(), &Shape::matrix(2, 3));
        assert_eq!(t.dtype(), DType::F32);
        assert!(t.all_equal(0.0));
    }

    #[test]
    fn test_from_f32() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let t = Tensor::from_f32(Shape::matrix(2, 3), &data).unwrap();
        assert_eq!(t.to_f32_vec(), data);
    }

    #[test]
    fn test_from_bytes_size_mismatch() {
        let result = Tensor::from_bytes(Shape::matrix(2, 3), DType::F32, vec![0u8; 10]);
        assert!(matches!(result, Err(TensorError::BufferSizeMismatch { .. })));
    }

    #[test]
    fn test_cast_f32_to_f16_and_back() {
        let t = Tensor::from_f32(Shape::vector(3), &[0.5, 1.0, 1.0e-3]).unwrap();
        let half = t.cast(DType::F16);
        assert_eq!(half.dtype(), DType::F16);
        assert_eq!(half.size_bytes(), 6);
        let back = half.cast(DType::F32).to_f32_vec();
        assert_eq!(back[0], 0.5);
        assert_eq!(back[1], 1.0);
        assert!((back[2] - 1.0e-3).abs() < 1.0e-6);
    }

    #[test]
    fn test_cast_saturating_clamps_to_f16_range() {
        let t = Tensor::from_f32(Shape::vector(4), &[1.0e5, -7.0e4, 2.0, f32::INFINITY]).unwrap();
        let (half, clamped) = t.cast_saturating(DType::F16);
        assert_eq!(clamped, 2);
        assert_eq!(half.dtype(), DType::F16);
        assert_eq!(half.to_f32_vec()[..3], [65504.0, -65504.0, 2.0]);
        assert!(half.to_f32_vec()[3].is_infinite());
        assert!(t.cast(DType::F16).to_f32_vec()[0].is_infinite());
    }

    #[test]
    fn test_from_integers_wraps_without_rounding() {
        let t = Tensor::from_integers(Shape::vector(2), DType::I64, &[(1 << 53) + 1, -3]).unwrap();
        assert_eq!(t.to_i64_vec(), vec![(1 << 53) + 1, -3]);
        let narrow = Tensor::from_integers(Shape::vector(1), DType::U8, &[257]).unwrap();
        assert_eq!(narrow.to_i64_vec(), vec![1]);
    }

    #[test]
    fn test_i64_roundtrip_is_exact() {
        let t = Tensor::from_i64(Shape::vector(2), &[i64::MAX, -7]).unwrap();
        assert_eq!(t.to_i64_vec(), vec![i64::MAX, -7]);
        assert_eq!(t.cast(DType::I32).to_i64_vec()[1], -7);
    }

    #[test]
    fn test_from_f64_bool_and_int() {
        let t = Tensor::from_f64(Shape::vector(3), DType::Bool, &[0.0, 2.0, -1.0]).unwrap();
        assert_eq!(t.as_bytes(), &[0, 1, 1]);
        let i = Tensor::from_f64(Shape::vector(2), DType::I64, &[2.9, -2.9]).unwrap();
        assert_eq!(i.to_i64_vec(), vec![2, -2]);
    }

    #[test]
    fn test_scalar_and_get() {
        let t = Tensor::scalar(DType::F32, 5.0);
        assert_eq!(t.shape().rank(), 0);
        assert_eq!(t.get_f64(0), Some(5.0));
        assert_eq!(t.get_f64(1), None);
    }

    #[test]
    fn test_reshaped() {
        let t = Tensor::from_f32(Shape::vector(6), &[0.0; 6]).unwrap();
        assert!(t.reshaped(Shape::matrix(2, 3)).is_ok());
        assert!(t.reshaped(Shape::matrix(2, 2)).is_err());
    }
}
