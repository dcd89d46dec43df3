// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Binary diffing and patching for Win32 x86 executables.
//!
//! Naively diffing two builds of an executable produces huge patches, because
//! one small source change shifts nearly every absolute and relative address
//! after it. This crate neutralizes that shifting: each executable is
//! disassembled into an address-independent [`AssemblyProgram`], the new
//! program's label indices are aligned to the old one's, both are re-encoded
//! into diff-friendly parallel streams, and each stream pair is diffed with a
//! suffix-array bsdiff. Applying a patch runs the pipeline in reverse and
//! reproduces the new file byte for byte, guarded by a checksum.
//!
//! Inputs that are not recognizable executables are diffed as opaque blobs,
//! so patch generation works on every pair of byte strings.
//!
//! # Examples
//!
//! Creating a patch between two versions and applying it:
//!
//! ```no_run
//! use std::fs;
//!
//! # fn main() -> exediff::Result<()> {
//! let old = fs::read("app-v1.exe")?;
//! let new = fs::read("app-v2.exe")?;
//!
//! let patch = exediff::generate_ensemble_patch(&old, &new)?;
//! let reconstructed = exediff::apply_ensemble_patch(&old, &patch)?;
//! assert_eq!(reconstructed, new);
//!
//! # Ok(())
//! # }
//! ```

mod adjust;
mod bsdiff;
mod disasm;
mod encoded;
mod ensemble;
mod error;
mod pe;
mod program;
mod stream;

pub use adjust::adjust;
pub use bsdiff::{apply_binary_patch, create_binary_patch};
pub use disasm::parse_pe;
pub use encoded::EncodedProgram;
pub use ensemble::{apply_ensemble_patch, generate_ensemble_patch};
pub use error::{BsdiffError, Error, Result};
pub use program::{AssemblyProgram, Instruction, Label, LabelTable};
pub use stream::{SinkStream, SinkStreamSet, SourceStream, SourceStreamSet};
