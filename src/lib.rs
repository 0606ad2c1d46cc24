pub mod config;
pub mod error;
pub mod lattice;
pub mod pipeline;
pub mod types;

pub use config::{CtcConfig, Reduction};
pub use error::CtcError;
pub use pipeline::builder::CtcLossBuilder;
pub use pipeline::defaults::{AutoBatchCompute, CpuBatchCompute};
pub use pipeline::runtime::CtcLoss;
pub use pipeline::traits::BatchCompute;
pub use types::{ActivationView, CtcOutput, LossInput};
