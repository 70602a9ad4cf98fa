mod codec;
mod endpoint;
mod filter;
mod property;
mod service;

pub use codec::*;
pub use endpoint::*;
pub use filter::*;
pub use property::*;
pub use service::*;
