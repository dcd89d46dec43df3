// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::io;

use thiserror::Error;

/// The status taxonomy shared by every stage of the pipeline.
///
/// Public operations return a [`Result`] carrying one of these instead of
/// panicking; composed operations propagate the first failure unchanged. The
/// one deliberate recovery is in patch generation, where a disassembly failure
/// falls back to diffing the inputs as opaque blobs.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The ensemble patch magic is invalid.
    #[error("bad ensemble magic: expected {expected:#010x}, found {found:#010x}")]
    BadEnsembleMagic {
        /// The magic value a valid patch carries.
        expected: u32,
        /// The magic value found in the input.
        found: u32,
    },
    /// The ensemble patch version is unsupported.
    #[error("unsupported ensemble version {0}")]
    BadEnsembleVersion(u32),
    /// The ensemble patch header is structurally invalid.
    #[error("malformed ensemble header")]
    BadEnsembleHeader,
    /// The reassembled output does not match the checksum stored in the patch.
    #[error("ensemble output failed checksum verification")]
    BadEnsembleCrc,
    /// The patch names a transform the old input no longer supports.
    #[error("old input does not support the transform recorded in the patch")]
    BadTransform,
    /// The input is not a recognizable 32-bit x86 PE executable.
    #[error("input not recognized as a Win32 x86 executable: {0}")]
    InputNotRecognized(&'static str),
    /// The executable parsed but violated an internal consistency rule.
    #[error("disassembly failed: {0}")]
    DisassemblyFailed(&'static str),
    /// An encoded program's tables are internally inconsistent.
    #[error("assembly failed: {0}")]
    AssemblyFailed(&'static str),
    /// The label adjuster detected an internal invariant violation.
    #[error("label adjustment failed: {0}")]
    AdjustmentFailed(&'static str),
    /// A stream read ran past the end of its buffer.
    #[error("stream error: read past end of stream")]
    StreamError,
    /// A stream had bytes left over after its consumer finished.
    #[error("stream not fully consumed")]
    StreamNotConsumed,
    /// A value could not be serialized (index or count overflow).
    #[error("serialization failed: {0}")]
    SerializationFailed(&'static str),
    /// Serialized input was truncated or malformed.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(&'static str),
    /// The embedded bsdiff engine reported a failure.
    #[error(transparent)]
    Bsdiff(#[from] BsdiffError),
}

/// The standalone bsdiff engine's own, smaller status.
#[derive(Debug, Error)]
pub enum BsdiffError {
    /// The old input does not match the checksum recorded in the patch.
    #[error("old input failed checksum verification")]
    CrcError,
    /// The patch is truncated or structurally invalid.
    #[error("malformed binary patch: {0}")]
    FormatError(&'static str),
    /// An internal invariant was violated while applying controls.
    #[error("unexpected error while applying binary patch: {0}")]
    UnexpectedError(&'static str),
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
