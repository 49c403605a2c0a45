//! Parallel page rendering

mod pool;
mod request;

pub use pool::{
    CancelToken, DEFAULT_RENDER_TIMEOUT, PoolConfig, RenderBatch, RenderPool,
    default_worker_count, partition,
};
pub use request::{BatchId, RenderError, RenderJob, RenderResponse};
