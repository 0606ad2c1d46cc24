use crate::config::CtcConfig;
use crate::pipeline::defaults::AutoBatchCompute;
use crate::pipeline::runtime::{CtcLoss, CtcLossParts};
use crate::pipeline::traits::BatchCompute;

pub struct CtcLossBuilder {
    config: CtcConfig,
    compute: Option<Box<dyn BatchCompute>>,
}

impl CtcLossBuilder {
    pub fn new(config: CtcConfig) -> Self {
        Self {
            config,
            compute: None,
        }
    }

    pub fn with_compute(mut self, compute: Box<dyn BatchCompute>) -> Self {
        self.compute = Some(compute);
        self
    }

    pub fn build(self) -> CtcLoss {
        CtcLoss::from_parts(CtcLossParts {
            config: self.config,
            compute: self
                .compute
                .unwrap_or_else(|| Box::new(AutoBatchCompute)),
        })
    }
}
