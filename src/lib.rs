//! PDF Distiller - watches a spool directory and merges PostScript jobs into PDFs.

pub mod config;
pub mod control;
pub mod convert;
pub mod display;
pub mod job;
pub mod service;
pub mod watcher;
