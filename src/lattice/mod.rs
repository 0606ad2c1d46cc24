pub mod batch;
pub mod extended;
pub mod forward_backward;
pub mod gradient;
pub mod normalize;
