pub mod api;
pub mod command;
pub mod content;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod model;
pub mod tenant;
pub mod transport;
pub mod utils;
