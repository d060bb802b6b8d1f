//! Prune masks
//!
//! Boolean keep-masks over a parameter's elements or input channels.
//! Masks are monotonic: bits only ever turn off. A cleared entry reports
//! `+inf` magnitude to the selector so it can never win again, which is
//! what keeps repeated steps pruning *new* weights.

use crate::Tensor;

/// Element-wise keep-mask for unstructured pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementMask {
    bits: Vec<bool>,
}

impl ElementMask {
    /// All-active mask over `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![true; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn count_active(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn is_active(&self, i: usize) -> bool {
        self.bits[i]
    }

    /// Turn off element `i`. Returns `true` if it was newly cleared.
    pub fn clear(&mut self, i: usize) -> bool {
        let was_active = self.bits[i];
        self.bits[i] = false;
        was_active
    }

    /// Zero the masked-off elements of `tensor` in place.
    pub fn apply(&self, tensor: &Tensor) {
        let mut data = tensor.data_mut();
        debug_assert_eq!(data.len(), self.bits.len());
        for (v, &keep) in data.iter_mut().zip(&self.bits) {
            if !keep {
                *v = 0.0;
            }
        }
    }

    /// Per-element |w| with `+inf` substituted for cleared elements.
    pub fn masked_magnitudes(&self, tensor: &Tensor) -> Vec<f32> {
        let data = tensor.data();
        debug_assert_eq!(data.len(), self.bits.len());
        data.iter()
            .zip(&self.bits)
            .map(|(v, &keep)| if keep { v.abs() } else { f32::INFINITY })
            .collect()
    }
}

/// Channel-wise keep-mask for structured pruning. One bit per weight
/// column of a `(rows, cols)` matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMask {
    bits: Vec<bool>,
}

impl ChannelMask {
    /// All-active mask over `cols` channels.
    pub fn new(cols: usize) -> Self {
        Self {
            bits: vec![true; cols],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.bits.len()
    }

    pub fn count_active(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn is_active(&self, c: usize) -> bool {
        self.bits[c]
    }

    /// Turn off channel `c`. Returns `true` if it was newly cleared.
    pub fn clear(&mut self, c: usize) -> bool {
        let was_active = self.bits[c];
        self.bits[c] = false;
        was_active
    }

    /// Indices of the still-active channels, in increasing order.
    pub fn active_channels(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(c, &keep)| keep.then_some(c))
            .collect()
    }

    /// Zero every masked-off column of a `(rows, cols)` tensor in place.
    pub fn apply(&self, tensor: &Tensor, rows: usize) {
        let cols = self.bits.len();
        let mut data = tensor.data_mut();
        debug_assert_eq!(data.len(), rows * cols);
        for r in 0..rows {
            for (c, &keep) in self.bits.iter().enumerate() {
                if !keep {
                    data[r * cols + c] = 0.0;
                }
            }
        }
    }

    /// Per-channel L2 norm over the rows, with `+inf` substituted for
    /// cleared channels.
    pub fn channel_norms(&self, tensor: &Tensor, rows: usize) -> Vec<f32> {
        let cols = self.bits.len();
        let data = tensor.data();
        debug_assert_eq!(data.len(), rows * cols);

        let mut norms = vec![0.0f32; cols];
        for r in 0..rows {
            for c in 0..cols {
                let v = data[r * cols + c];
                norms[c] += v * v;
            }
        }
        for (c, norm) in norms.iter_mut().enumerate() {
            *norm = if self.bits[c] { norm.sqrt() } else { f32::INFINITY };
        }
        norms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_element_mask_clear_is_monotonic() {
        let mut mask = ElementMask::new(4);
        assert_eq!(mask.count_active(), 4);

        assert!(mask.clear(1));
        assert!(!mask.clear(1), "second clear is not a new removal");
        assert_eq!(mask.count_active(), 3);
        assert!(!mask.is_active(1));
    }

    #[test]
    fn test_element_mask_apply_zeroes() {
        let t = Tensor::from_vec(vec![1.0, -2.0, 3.0], true);
        let mut mask = ElementMask::new(3);
        mask.clear(0);
        mask.clear(2);
        mask.apply(&t);
        assert_eq!(t.to_vec(), vec![0.0, -2.0, 0.0]);
    }

    #[test]
    fn test_masked_magnitudes_hide_cleared() {
        let t = Tensor::from_vec(vec![1.0, -2.0, 0.5], true);
        let mut mask = ElementMask::new(3);
        mask.clear(2);
        let mags = mask.masked_magnitudes(&t);
        assert_eq!(mags[0], 1.0);
        assert_eq!(mags[1], 2.0);
        assert!(mags[2].is_infinite());
    }

    #[test]
    fn test_channel_mask_apply_zeroes_columns() {
        // (2, 3) matrix, clear column 1.
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], true);
        let mut mask = ChannelMask::new(3);
        mask.clear(1);
        mask.apply(&t, 2);
        assert_eq!(t.to_vec(), vec![1.0, 0.0, 3.0, 4.0, 0.0, 6.0]);
        assert_eq!(mask.active_channels(), vec![0, 2]);
    }

    #[test]
    fn test_channel_norms() {
        // columns: [3,4] -> 5, [0,0] -> 0, [1,1] -> sqrt(2)
        let t = Tensor::from_vec(vec![3.0, 0.0, 1.0, 4.0, 0.0, 1.0], true);
        let mask = ChannelMask::new(3);
        let norms = mask.channel_norms(&t, 2);
        assert_abs_diff_eq!(norms[0], 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(norms[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(norms[2], std::f32::consts::SQRT_2, epsilon = 1e-6);
    }

    #[test]
    fn test_channel_norms_hide_cleared() {
        let t = Tensor::from_vec(vec![3.0, 1.0, 4.0, 1.0], true);
        let mut mask = ChannelMask::new(2);
        mask.clear(0);
        let norms = mask.channel_norms(&t, 2);
        assert!(norms[0].is_infinite());
        assert!(norms[1].is_finite());
    }
}
