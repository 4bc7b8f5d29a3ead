pub mod credentials;
pub mod options;
pub mod record;
pub mod service;

pub use credentials::*;
pub use options::*;
pub use record::*;
pub use service::*;
