pub mod deploy;
pub mod specs;

pub use deploy::{connect, deploy_all, require_api_key, DeployError, DeployOptions};
pub use specs::endpoint_specs;
