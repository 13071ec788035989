pub mod error;
pub mod normalize;
pub mod periodic;

pub use error::{CoreError, CoreResult};
