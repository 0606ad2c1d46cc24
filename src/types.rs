use crate::error::CtcError;

/// Borrowed dense block of unnormalized per-class scores (logits), laid out
/// time-major: entry `(t, n, c)` lives at `(t * batch + n) * classes + c`.
///
/// The block is read-only for the duration of one loss invocation; padding
/// frames beyond a sample's valid length may hold arbitrary values.
#[derive(Debug, Clone, Copy)]
pub struct ActivationView<'a> {
    data: &'a [f32],
    frames: usize,
    batch: usize,
    classes: usize,
}

impl<'a> ActivationView<'a> {
    pub fn new(
        data: &'a [f32],
        frames: usize,
        batch: usize,
        classes: usize,
    ) -> Result<Self, CtcError> {
        let expected = frames * batch * classes;
        if data.len() != expected {
            return Err(CtcError::invalid_shape(format!(
                "activation buffer holds {} values, shape ({frames} x {batch} x {classes}) needs {expected}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            frames,
            batch,
            classes,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Logit row for frame `t` of sample `n`, `classes` entries long.
    #[inline]
    pub fn frame_row(&self, t: usize, n: usize) -> &'a [f32] {
        let offset = (t * self.batch + n) * self.classes;
        &self.data[offset..offset + self.classes]
    }

    /// The whole flat block, for backends that upload it wholesale.
    pub fn data(&self) -> &'a [f32] {
        self.data
    }
}

/// Which loss input a derivative is requested with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossInput {
    Activations,
    Labels,
    LabelLengths,
    FrameLengths,
}

/// Per-sample costs plus the gradient of the reduced cost with respect to
/// every activation logit.
#[derive(Debug, Clone, PartialEq)]
pub struct CtcOutput {
    /// Negative log-likelihood per sample; `f32::INFINITY` for samples with
    /// no feasible alignment.
    pub costs: Vec<f32>,
    /// Same shape as the activations, zero outside each sample's valid
    /// frame range.
    pub gradient: Vec<f32>,
}

impl CtcOutput {
    /// Derivative with respect to the given input. Only the activations are
    /// differentiable; label and length inputs are integral and yield `None`
    /// rather than an error.
    pub fn gradient_with(&self, input: LossInput) -> Option<&[f32]> {
        match input {
            LossInput::Activations => Some(&self.gradient),
            LossInput::Labels | LossInput::LabelLengths | LossInput::FrameLengths => None,
        }
    }
}
