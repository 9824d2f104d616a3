// Workflow orchestration - typed task state driven through a stage graph
pub mod checkpoint;
pub mod dispatch;
pub mod executor;
pub mod graph;
pub mod nodes;
pub mod pipeline;
pub mod progress;
pub mod reducer;
pub mod retry;
pub mod router;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointer, PgCheckpointer};
pub use executor::{ExecutorBuilder, ExecutorConfig, PipelineExecutor};
pub use pipeline::{build_pipeline_graph, create_pipeline_executor};
pub use progress::{ChannelObserver, NoopObserver, ProgressObserver, ProgressUpdate, TracingObserver};
pub use retry::{Jitter, RetryPolicy};
pub use state::{Scene, StateUpdate, Step, TaskConfig, TaskState, UnitResult};
