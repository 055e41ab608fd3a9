pub mod memory;
pub mod runpod;
pub mod types;

pub use memory::MemoryPlatform;
pub use runpod::RunpodPlatform;
pub use types::{
    CreatedEndpoint, CreatedTemplate, EndpointRequest, EndpointSummary, Platform, TemplateRequest,
};
