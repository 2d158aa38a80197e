#![recursion_limit = "256"]

//! Evaluation harness for music-notation segmentation checkpoints.
//!
//! Loads a saved model, cuts random square windows out of a labelled
//! page dataset, runs a simulated (zero learning-rate) training loop
//! and writes the final metrics plus a history plot next to the
//! checkpoint.

pub mod cli;
pub mod application;
pub mod domain;
pub mod data;
pub mod ml;
pub mod infra;
pub mod error;

#[cfg(test)]
pub(crate) mod testutil;
