//! Capability backends.
//!
//! The pipeline only depends on the [`Synthesizer`](crate::Synthesizer) and
//! [`Transcriber`](crate::Transcriber) traits. This module provides
//! implementations that drive external programs, so any model that can be
//! wrapped in a command line can narrate.

pub mod command;
