pub mod console;
pub mod probe;
pub mod setup;
