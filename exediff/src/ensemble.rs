// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The top-level orchestrator: whole old file and new file in, one patch
//! file out, and the inverse.
//!
//! Generation tries the executable transform first and falls back to diffing
//! the inputs as opaque blobs whenever either side fails to disassemble, so a
//! patch is produced for every pair of byte strings. Application validates
//! the header, re-derives the old input's encoded streams, applies one bsdiff
//! sub-patch per stream, reassembles, and verifies the result's checksum as
//! the final defense against silent mis-assembly.

use log::{debug, info};

use crate::{
    adjust::adjust,
    bsdiff::{apply_binary_patch, create_binary_patch},
    disasm::parse_pe,
    encoded::{EncodedProgram, STREAM_COUNT},
    error::{Error, Result},
    stream::{SinkStream, SinkStreamSet, SourceStream, SourceStreamSet},
};

const ENSEMBLE_MAGIC: u32 = 0x1c_86_8f_5d;
const ENSEMBLE_VERSION: u32 = 1;

const TRANSFORM_RAW: u8 = 0;
const TRANSFORM_PE_X86: u8 = 1;

/// Creates an ensemble patch transforming `old` into `new`.
///
/// When both inputs disassemble as PE/x86 executables, the patch carries one
/// bsdiff sub-patch per encoded-program stream; otherwise the whole files are
/// diffed as opaque blobs. Generation never refuses an input merely because
/// it is not a recognizable executable.
///
/// # Errors
///
/// Fails only on internal errors (never on unrecognizable input).
pub fn generate_ensemble_patch(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    match generate_executable_patch(old, new) {
        Ok(patch) => Ok(patch),
        Err(Error::InputNotRecognized(reason)) => {
            info!("input not a PE/x86 executable ({reason}), using raw diff");
            generate_raw_patch(old, new)
        }
        Err(Error::DisassemblyFailed(reason)) => {
            info!("disassembly failed ({reason}), using raw diff");
            generate_raw_patch(old, new)
        }
        Err(other) => Err(other),
    }
}

/// Applies an ensemble patch to `old`, reconstructing the new file.
///
/// # Errors
///
/// Fails with [`Error::BadEnsembleMagic`] / [`Error::BadEnsembleVersion`] /
/// [`Error::BadEnsembleHeader`] on a malformed header, [`Error::BadTransform`]
/// when `old` no longer supports the transform the patch was generated with,
/// and [`Error::BadEnsembleCrc`] when the reassembled output fails checksum
/// verification.
pub fn apply_ensemble_patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let mut source = SourceStream::new(patch);
    let header = |_: Error| Error::BadEnsembleHeader;

    let magic = source.read_u32_le().map_err(header)?;
    if magic != ENSEMBLE_MAGIC {
        return Err(Error::BadEnsembleMagic {
            expected: ENSEMBLE_MAGIC,
            found: magic,
        });
    }
    let version = source.read_u32_le().map_err(header)?;
    if version != ENSEMBLE_VERSION {
        return Err(Error::BadEnsembleVersion(version));
    }
    let new_crc = source.read_u32_le().map_err(header)?;
    let transform = source.read_u8().map_err(header)?;
    let body = source.read_rest();

    let new = match transform {
        TRANSFORM_RAW => apply_binary_patch(old, body)?,
        TRANSFORM_PE_X86 => apply_executable_patch(old, body)?,
        _ => return Err(Error::BadEnsembleHeader),
    };

    if crc32fast::hash(&new) != new_crc {
        return Err(Error::BadEnsembleCrc);
    }
    Ok(new)
}

fn write_header(transform: u8, new: &[u8]) -> SinkStream {
    let mut sink = SinkStream::new();
    sink.write_u32_le(ENSEMBLE_MAGIC);
    sink.write_u32_le(ENSEMBLE_VERSION);
    sink.write_u32_le(crc32fast::hash(new));
    sink.write_u8(transform);
    sink
}

fn generate_raw_patch(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let mut patch = write_header(TRANSFORM_RAW, new);
    patch.write(&create_binary_patch(old, new)?);
    Ok(patch.into_vec())
}

fn generate_executable_patch(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let old_program = parse_pe(old)?;
    let mut new_program = parse_pe(new)?;
    adjust(&old_program, &mut new_program)?;

    let old_streams = EncodedProgram::from_program(old_program)?.stream_bodies()?;
    let new_streams = EncodedProgram::from_program(new_program)?.stream_bodies()?;

    let mut sub_patches = SinkStreamSet::with_streams(STREAM_COUNT);
    for (ix, (old_stream, new_stream)) in old_streams.iter().zip(&new_streams).enumerate() {
        let sub_patch = create_binary_patch(old_stream, new_stream)?;
        debug!(
            "stream {ix}: {} -> {} bytes, sub-patch {} bytes",
            old_stream.len(),
            new_stream.len(),
            sub_patch.len(),
        );
        sub_patches.stream(ix).write(&sub_patch);
    }

    let mut patch = write_header(TRANSFORM_PE_X86, new);
    sub_patches.copy_to(&mut patch)?;
    Ok(patch.into_vec())
}

fn apply_executable_patch(old: &[u8], body: &[u8]) -> Result<Vec<u8>> {
    // The patch was generated against a disassembly of `old`; if `old` no
    // longer disassembles, the patch cannot apply.
    let old_program = match parse_pe(old) {
        Ok(program) => program,
        Err(Error::InputNotRecognized(_) | Error::DisassemblyFailed(_)) => {
            return Err(Error::BadTransform);
        }
        Err(other) => return Err(other),
    };
    let old_streams = EncodedProgram::from_program(old_program)?.stream_bodies()?;

    let mut sub_patches = SourceStreamSet::parse(body)?;
    if sub_patches.stream_count() != STREAM_COUNT {
        return Err(Error::BadEnsembleHeader);
    }

    let mut new_streams = Vec::with_capacity(STREAM_COUNT);
    for (ix, old_stream) in old_streams.iter().enumerate() {
        let sub_patch = sub_patches.stream(ix)?.read_rest();
        new_streams.push(apply_binary_patch(old_stream, sub_patch)?);
    }

    EncodedProgram::from_stream_bodies(&new_streams)?.assemble()
}
