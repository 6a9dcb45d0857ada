//! scenesmith library crate
//!
//! Turns a natural-language prompt into Blender Python code via an LLM
//! backend, then validates, executes, and repairs it in a bounded loop.
//! The CLI in `main.rs` is a thin front end over these modules.

pub mod agent;
pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod host;
pub mod keyring;
pub mod safety;
pub mod syntax;
pub mod util;
