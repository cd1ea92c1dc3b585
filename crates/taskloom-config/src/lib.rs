pub mod factory;
pub mod model;

pub use factory::ProviderConfigFactory;
pub use model::{ProviderConfig, ProviderKind};
