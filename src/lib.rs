//! Declarative forms for terminal front-ends.
//!
//! Descriptors go in, a resolved tree of visible fields comes out, and a
//! submission state machine drives validation and transport. The preview
//! binary in `main.rs` renders a form with ratatui.

pub mod app;
pub mod error;
pub mod form_core;
pub mod logging;
pub mod model;
pub mod services;

pub use app::runtime::{FormRuntime, Notice};
pub use app::submission::{SubmissionState, Ticket};
pub use app::{update, Effect, FormInstance, FormMsg, NoticeLevel};
pub use error::{Error, FieldErrors, Result};
pub use model::FormDefinition;
