pub mod assemble;
pub mod cli;
pub mod config;
pub mod driver;
pub mod inspect;
pub mod paths;
pub mod relay;
pub mod router;
