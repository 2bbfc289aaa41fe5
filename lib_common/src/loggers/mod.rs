/// Console plus rolling JSON file logging.
pub mod logsetup;

pub use logsetup::{setup_logging, LoggingError};
