pub mod args;
pub mod dashboard;
pub mod interpreter;
pub mod line_source;
pub mod protocol;
pub mod recorder;
pub mod render;
pub mod state;
pub mod supply;
