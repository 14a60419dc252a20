pub mod error;
pub mod queue;
pub mod renderer;
pub mod repos;
