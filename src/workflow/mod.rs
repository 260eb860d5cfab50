pub mod batch_flow;
pub mod evaluation_ctx;

pub use batch_flow::BatchFlow;
pub use evaluation_ctx::EvaluationCtx;
