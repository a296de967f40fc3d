use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::layers::gru_cell::{GRUCell, GRUCellCache, GRUCellGradients};
use crate::layers::lstm_cell::{LSTMCell, LSTMCellCache, LSTMCellGradients};
use crate::optimizers::Optimizer;

/// An LSTM cell unrolled over a whole input window.
///
/// Hidden and cell state start at zero for every batch. With `return_sequences`
/// the hidden state of every step is emitted, otherwise only the last one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LSTMLayer {
    pub cell: LSTMCell,
    pub return_sequences: bool,
}

impl LSTMLayer {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        units: usize,
        return_sequences: bool,
        rng: &mut R,
    ) -> Self {
        LSTMLayer {
            cell: LSTMCell::new(input_size, units, rng),
            return_sequences,
        }
    }

    pub fn units(&self) -> usize {
        self.cell.hidden_size
    }

    /// Runs the window forward, returning the hidden state of every step plus caches
    pub fn forward_sequence_with_cache(
        &self,
        sequence: &[Array2<f64>],
    ) -> (Vec<Array2<f64>>, Vec<LSTMCellCache>) {
        let batch = sequence.first().map(|x| x.ncols()).unwrap_or(0);
        let mut hx = Array2::zeros((self.units(), batch));
        let mut cx = Array2::zeros((self.units(), batch));
        let mut outputs = Vec::with_capacity(sequence.len());
        let mut caches = Vec::with_capacity(sequence.len());

        for input in sequence {
            let (hy, cy, cache) = self.cell.forward_with_cache(input, &hx, &cx);
            outputs.push(hy.clone());
            caches.push(cache);
            hx = hy;
            cx = cy;
        }

        (outputs, caches)
    }

    /// Backpropagation through time.
    ///
    /// `grad_hidden[t]` is the loss gradient arriving at the hidden output of step `t`.
    /// Returns accumulated parameter gradients and the gradient for every input step.
    pub fn backward_sequence(
        &self,
        grad_hidden: &[Array2<f64>],
        caches: &[LSTMCellCache],
    ) -> (LSTMCellGradients, Vec<Array2<f64>>) {
        let mut gradients = self.cell.zero_gradients();
        let mut grad_inputs = vec![Array2::zeros((0, 0)); caches.len()];

        let batch = grad_hidden.first().map(|g| g.ncols()).unwrap_or(0);
        let mut dh_next = Array2::zeros((self.units(), batch));
        let mut dc_next = Array2::zeros((self.units(), batch));

        for t in (0..caches.len()).rev() {
            let dh = &grad_hidden[t] + &dh_next;
            let (step_gradients, dx, dhx, dcx) = self.cell.backward(&dh, &dc_next, &caches[t]);
            gradients.accumulate(&step_gradients);
            grad_inputs[t] = dx;
            dh_next = dhx;
            dc_next = dcx;
        }

        (gradients, grad_inputs)
    }

    pub fn update_parameters<O: Optimizer + ?Sized>(
        &mut self,
        gradients: &LSTMCellGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        self.cell.update_parameters(gradients, optimizer, prefix);
    }

    pub fn num_parameters(&self) -> usize {
        self.cell.num_parameters()
    }
}

/// A GRU cell unrolled over a whole input window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GRULayer {
    pub cell: GRUCell,
    pub return_sequences: bool,
}

impl GRULayer {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        units: usize,
        return_sequences: bool,
        rng: &mut R,
    ) -> Self {
        GRULayer {
            cell: GRUCell::new(input_size, units, rng),
            return_sequences,
        }
    }

    pub fn units(&self) -> usize {
        self.cell.hidden_size
    }

    pub fn forward_sequence_with_cache(
        &self,
        sequence: &[Array2<f64>],
    ) -> (Vec<Array2<f64>>, Vec<GRUCellCache>) {
        let batch = sequence.first().map(|x| x.ncols()).unwrap_or(0);
        let mut hx = Array2::zeros((self.units(), batch));
        let mut outputs = Vec::with_capacity(sequence.len());
        let mut caches = Vec::with_capacity(sequence.len());

        for input in sequence {
            let (hy, cache) = self.cell.forward_with_cache(input, &hx);
            outputs.push(hy.clone());
            caches.push(cache);
            hx = hy;
        }

        (outputs, caches)
    }

    pub fn backward_sequence(
        &self,
        grad_hidden: &[Array2<f64>],
        caches: &[GRUCellCache],
    ) -> (GRUCellGradients, Vec<Array2<f64>>) {
        let mut gradients = self.cell.zero_gradients();
        let mut grad_inputs = vec![Array2::zeros((0, 0)); caches.len()];

        let batch = grad_hidden.first().map(|g| g.ncols()).unwrap_or(0);
        let mut dh_next = Array2::zeros((self.units(), batch));

        for t in (0..caches.len()).rev() {
            let dh = &grad_hidden[t] + &dh_next;
            let (step_gradients, dx, dhx) = self.cell.backward(&dh, &caches[t]);
            gradients.accumulate(&step_gradients);
            grad_inputs[t] = dx;
            dh_next = dhx;
        }

        (gradients, grad_inputs)
    }

    pub fn update_parameters<O: Optimizer + ?Sized>(
        &mut self,
        gradients: &GRUCellGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        self.cell.update_parameters(gradients, optimizer, prefix);
    }

    pub fn num_parameters(&self) -> usize {
        self.cell.num_parameters()
    }
}
