//! Tool server exposing the pipeline over the Model Context Protocol.
pub mod server;
pub mod tools;
