pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{ConstantDepthBackend, FnDepthBackend, LumaDepthBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractDepthBackend;
