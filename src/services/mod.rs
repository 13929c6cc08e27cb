pub mod cli_runner;
pub mod loader;
pub mod validator;

pub use cli_runner::{CommandTransport, FnTransport, SubmitTransport};
pub use loader::{load_shared, SingleFlight};
pub use validator::{RulesValidator, SchemaValidator, ValidationInput};
