//! Priority task dispatch.
//!
//! - [`ChunkTaskPriorityQueue`]: level buckets of per-chunk task lists
//! - [`ChunkTaskDispatcher`]: serial decision loop feeding an executor
//! - [`Throttle`]: caps distinct chunks in execution

mod dispatcher;
mod priority_queue;

pub use dispatcher::{ChunkTaskDispatcher, ExecutionGate, Throttle, Unthrottled};
pub use priority_queue::{ChunkTaskPriorityQueue, TasksForChunk};
