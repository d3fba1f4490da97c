pub mod device_refresh;
pub mod dispatcher;
pub mod error;

pub use dispatcher::Dispatcher;
pub use error::{DispatchError, Result};
