pub mod config;
pub mod corpus;
pub mod embedding;
pub mod errors;
pub mod evaluation;
pub mod features;
pub mod index;
pub mod logging;
pub mod retrieval;
pub mod search;
pub mod selector;
pub mod server;
pub mod text;
