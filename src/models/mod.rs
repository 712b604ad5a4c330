mod application;
mod deployment;
mod history;
mod outcome;
mod server;

pub use application::*;
pub use deployment::*;
pub use history::*;
pub use outcome::*;
pub use server::*;
