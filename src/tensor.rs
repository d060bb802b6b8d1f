//! Shared-handle flat tensor
//!
//! Parameters are flat `f32` buffers; shape is tracked beside the data by
//! whoever owns the tensor (layers know their dims, the registry records
//! shapes). Cloning a `Tensor` shares storage, which is what makes weight
//! tying and engine-held parameter handles work: the pruning engine keeps
//! clones of the model's parameters and mutates them in place through
//! `data_mut`.

use ndarray::Array1;
use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Flat `f32` tensor with shared storage.
#[derive(Clone)]
pub struct Tensor {
    data: Rc<RefCell<Array1<f32>>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a tensor from an ndarray.
    pub fn new(data: Array1<f32>, requires_grad: bool) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
            requires_grad,
        }
    }

    /// Create a tensor from a vector.
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        Self::new(Array1::from(data), requires_grad)
    }

    /// Create a zero-filled tensor.
    pub fn zeros(len: usize, requires_grad: bool) -> Self {
        Self::new(Array1::zeros(len), requires_grad)
    }

    /// Create a one-filled tensor.
    pub fn ones(len: usize, requires_grad: bool) -> Self {
        Self::new(Array1::ones(len), requires_grad)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// Whether the tensor has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned snapshot of the data.
    pub fn data(&self) -> Array1<f32> {
        self.data.borrow().clone()
    }

    /// Owned snapshot as a plain vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.borrow().to_vec()
    }

    /// Mutable access to the underlying storage.
    ///
    /// All handles cloned from this tensor observe the mutation.
    pub fn data_mut(&self) -> RefMut<'_, Array1<f32>> {
        self.data.borrow_mut()
    }

    /// Whether the tensor participates in training.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// True when two handles share the same storage (e.g. tied weights).
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Deep copy with fresh storage. Used by checkpoint export, which must
    /// not mutate the live model's parameters.
    pub fn detach_copy(&self) -> Tensor {
        Tensor::new(self.data.borrow().clone(), self.requires_grad)
    }

    /// Number of nonzero elements.
    pub fn count_nonzero(&self) -> usize {
        self.data.borrow().iter().filter(|v| **v != 0.0).count()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("len", &self.len())
            .field("requires_grad", &self.requires_grad)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_and_len() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        assert_eq!(t.len(), 3);
        assert!(!t.is_empty());
        assert!(t.requires_grad());
    }

    #[test]
    fn test_clone_shares_storage() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let b = a.clone();
        assert!(a.shares_storage(&b));

        b.data_mut()[0] = 9.0;
        assert_eq!(a.data()[0], 9.0);
    }

    #[test]
    fn test_detach_copy_is_independent() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let b = a.detach_copy();
        assert!(!a.shares_storage(&b));

        b.data_mut()[0] = 9.0;
        assert_eq!(a.data()[0], 1.0);
    }

    #[test]
    fn test_count_nonzero() {
        let t = Tensor::from_vec(vec![0.0, 1.0, 0.0, -2.0], false);
        assert_eq!(t.count_nonzero(), 2);
    }

    #[test]
    fn test_zeros_ones() {
        let z = Tensor::zeros(4, false);
        let o = Tensor::ones(4, false);
        assert_eq!(z.count_nonzero(), 0);
        assert_eq!(o.count_nonzero(), 4);
    }
}
