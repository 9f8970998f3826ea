pub mod cli;
pub mod logging;
pub mod session;

pub use session::{LiveSession, SessionReport};
