//! # patch-eval
//!
//! Decides, for every published version of the libraries touched by a
//! security fix, whether that version still contains the vulnerable code.
//!
//! ## Architecture
//!
//! - **model**: Bugs, construct changes, artifacts and verdicts as exchanged with the services
//! - **version**: Release-aware version ordering
//! - **backend**: Collaborator traits and their error type
//! - **client**: Blocking HTTP implementation of the collaborators
//! - **local**: Artifact registry over a local Maven repository
//! - **cache**: LMDB store for construct ASTs and AST-diff edit counts
//! - **consolidate**: Net change per construct across all fix commits
//! - **candidates**: Versions worth evaluating, with allow/deny filters
//! - **pool**: Bounded worker pool with completion counting and timeouts
//! - **analyzer**: Per-version presence checks and AST distances
//! - **assessment**: Per-version results and the evidence derived from them
//! - **ledger**: `;`-separated ledger making reruns incremental
//! - **bytecode**: Bytecode comparison for versions without sources
//! - **release**: Minor-release trees and their equality/intersection evidence
//! - **classify**: Layered verdicts and manual propagation
//! - **publish**: Upload or file output of verdicts per source
//! - **pipeline**: Per-bug orchestration and the scheduled job

pub mod analyzer;
pub mod assessment;
pub mod backend;
pub mod bytecode;
pub mod cache;
pub mod candidates;
pub mod classify;
pub mod cli;
pub mod client;
pub mod config;
pub mod consolidate;
pub mod ledger;
pub mod local;
pub mod model;
pub mod pipeline;
pub mod pool;
pub mod publish;
pub mod release;
pub mod version;

#[cfg(test)]
pub mod testing;
