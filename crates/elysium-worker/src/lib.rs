pub mod engine;
pub mod handler;
pub mod queue;
pub mod server;

pub use engine::{create_engine, Engine, EngineHandle, EngineRuntime, GenerateRequest};
pub use handler::{HandlerError, JobHandler};
pub use queue::{run_queue_worker, QueueConfig};
