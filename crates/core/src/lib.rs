//! # Core - Foundations of the Causal Engine
//!
//! This crate provides the domain-independent building blocks:
//!
//! - **Matrices**: [`LabeledMatrix`], a dense 2-D container addressable by
//!   index or by row/column name, plus its text reader and dump format
//! - **Errors**: [`CausalError`], shared by every layer above
//! - **Configuration**: [`EngineConfig`], loaded from TOML
//!
//! Adjacency matrices, conditional probability tables and observation
//! counts are all `LabeledMatrix` values; its coordinate math and name
//! bookkeeping are tested here independent of any network logic.

pub mod config;
pub mod error;
pub mod matrix;

pub use config::{EngineConfig, InferenceConfig, LearningConfig};
pub use error::CausalError;
pub use matrix::{LabeledMatrix, NA};
