/// How per-sample costs and gradients are scaled before being returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Raw per-sample negative log-likelihoods.
    None,
    /// Divide every cost and gradient entry by the batch size.
    BatchMean,
    /// Divide every cost and gradient entry by the total number of valid frames.
    FrameMean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CtcConfig {
    /// Class id reserved for the blank symbol.
    pub blank_id: usize,
    pub reduction: Reduction,
}

impl CtcConfig {
    pub const DEFAULT_BLANK_ID: usize = 0;
}

impl Default for CtcConfig {
    fn default() -> Self {
        Self {
            blank_id: Self::DEFAULT_BLANK_ID,
            reduction: Reduction::None,
        }
    }
}
