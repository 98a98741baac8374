pub mod cli;
pub mod file;
pub mod peer;
pub mod reactor;
pub mod scanner;
pub mod seeder;
pub mod server;
pub mod tracker;
pub mod util;

pub use util::Sha1;
