mod error;
mod logging;

pub use error::{err, Error, Result};
pub use logging::init_default;
