//! Parley: a collaborative, terminal-based text editor engine.
//!
//! The core is the operation engine (`engine`) built on top of the
//! position algebra (`position`), document buffer (`document`),
//! per-participant state (`participant`) and history/blame log
//! (`history`). `protocol` and `transport` carry edits between an
//! authoritative host and its connected peers over a TCP star topology;
//! `permissions` and `persistence` back the CLI modes in spec.md §6.
//! `render`, `export`, and `tui` are read-only consumers of the engine,
//! never sources of editing logic themselves.

pub mod cli;
pub mod document;
pub mod engine;
pub mod error;
pub mod export;
pub mod history;
pub mod participant;
pub mod permissions;
pub mod persistence;
pub mod position;
pub mod protocol;
pub mod render;
pub mod transport;
pub mod tui;
