//! The parameter set read by every forward pass.
//!
//! Layers borrow the set immutably for their whole lifetime, so the
//! optimizer (which needs `&mut`) can only touch it between passes.

use std::collections::HashMap;

use ndarray::{Array1, Array2};

use crate::error::{Result, RnnError};

use super::key::ParamKey;

/// A weight matrix or a bias vector.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamTensor {
    Matrix(Array2<f32>),
    Vector(Array1<f32>),
}

impl ParamTensor {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ParamTensor::Matrix(m) => m.shape().to_vec(),
            ParamTensor::Vector(v) => v.shape().to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ParamTensor::Matrix(m) => m.len(),
            ParamTensor::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Array2<f32>> for ParamTensor {
    fn from(m: Array2<f32>) -> Self {
        ParamTensor::Matrix(m)
    }
}

impl From<Array1<f32>> for ParamTensor {
    fn from(v: Array1<f32>) -> Self {
        ParamTensor::Vector(v)
    }
}

/// Keyed collection of layer tensors.
#[derive(Clone, Debug, Default)]
pub struct ParameterSet {
    tensors: HashMap<ParamKey, ParamTensor>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, returning the one it replaces.
    pub fn insert(&mut self, key: ParamKey, tensor: impl Into<ParamTensor>) -> Option<ParamTensor> {
        self.tensors.insert(key, tensor.into())
    }

    pub fn get(&self, key: &ParamKey) -> Option<&ParamTensor> {
        self.tensors.get(key)
    }

    /// Mutable access for the optimizer between forward passes.
    pub fn get_mut(&mut self, key: &ParamKey) -> Option<&mut ParamTensor> {
        self.tensors.get_mut(key)
    }

    pub fn contains(&self, key: &ParamKey) -> bool {
        self.tensors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &ParamTensor)> {
        self.tensors.iter()
    }

    /// Total number of scalar parameters.
    pub fn param_count(&self) -> usize {
        self.tensors.values().map(ParamTensor::len).sum()
    }

    /// Move every tensor of `other` into this set (later keys win).
    pub fn merge(&mut self, other: ParameterSet) {
        self.tensors.extend(other.tensors);
    }

    pub fn matrix(&self, key: &ParamKey) -> Result<&Array2<f32>> {
        match self.tensors.get(key) {
            Some(ParamTensor::Matrix(m)) => Ok(m),
            Some(ParamTensor::Vector(v)) => Err(RnnError::ParameterShape {
                key: key.clone(),
                expected: vec![0, 0],
                actual: v.shape().to_vec(),
            }),
            None => Err(RnnError::MissingParameter { key: key.clone() }),
        }
    }

    pub fn vector(&self, key: &ParamKey) -> Result<&Array1<f32>> {
        match self.tensors.get(key) {
            Some(ParamTensor::Vector(v)) => Ok(v),
            Some(ParamTensor::Matrix(m)) => Err(RnnError::ParameterShape {
                key: key.clone(),
                expected: vec![0],
                actual: m.shape().to_vec(),
            }),
            None => Err(RnnError::MissingParameter { key: key.clone() }),
        }
    }

    /// A `(rows, cols)` matrix, or a shape error naming the key.
    pub fn matrix_shaped(&self, key: &ParamKey, rows: usize, cols: usize) -> Result<&Array2<f32>> {
        let m = self.matrix(key)?;
        if m.dim() != (rows, cols) {
            return Err(RnnError::ParameterShape {
                key: key.clone(),
                expected: vec![rows, cols],
                actual: m.shape().to_vec(),
            });
        }
        Ok(m)
    }

    /// A vector of length `len`, or a shape error naming the key.
    pub fn vector_len(&self, key: &ParamKey, len: usize) -> Result<&Array1<f32>> {
        let v = self.vector(key)?;
        if v.len() != len {
            return Err(RnnError::ParameterShape {
                key: key.clone(),
                expected: vec![len],
                actual: v.shape().to_vec(),
            });
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Role;
    use std::sync::Arc;

    fn key(role: Role) -> ParamKey {
        let c: Arc<str> = Arc::from("encoder");
        ParamKey::new(&c, role, 0)
    }

    #[test]
    fn test_missing_parameter() {
        let params = ParameterSet::new();
        let err = params.matrix(&key(Role::U)).unwrap_err();
        assert!(matches!(err, RnnError::MissingParameter { .. }));
    }

    #[test]
    fn test_shape_checks() {
        let mut params = ParameterSet::new();
        params.insert(key(Role::U), Array2::<f32>::zeros((4, 8)));
        params.insert(key(Role::B), Array1::<f32>::zeros(8));
        assert!(params.matrix_shaped(&key(Role::U), 4, 8).is_ok());
        assert!(matches!(
            params.matrix_shaped(&key(Role::U), 4, 4),
            Err(RnnError::ParameterShape { .. })
        ));
        assert!(params.vector_len(&key(Role::B), 8).is_ok());
        assert!(params.vector(&key(Role::U)).is_err());
        assert!(params.matrix(&key(Role::B)).is_err());
    }

    #[test]
    fn test_param_count_and_mutation() {
        let mut params = ParameterSet::new();
        params.insert(key(Role::U), Array2::<f32>::zeros((4, 8)));
        params.insert(key(Role::B), Array1::<f32>::zeros(8));
        assert_eq!(params.param_count(), 40);

        if let Some(ParamTensor::Vector(b)) = params.get_mut(&key(Role::B)) {
            b.fill(0.5);
        }
        assert_eq!(params.vector(&key(Role::B)).unwrap()[3], 0.5);
    }
}
