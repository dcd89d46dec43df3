// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The PE/x86 disassembler: raw bytes in, [`AssemblyProgram`] out.
//!
//! The walk is linear over the whole file. Base-relocation fixup sites become
//! Abs32 references, near call/jmp/jcc instructions inside executable
//! sections whose targets land inside the image become Rel32 references, and
//! every other byte lands in an opaque run. Labels get their natural index in
//! first-reference order.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::{
    error::{Error, Result},
    pe::PeImage,
    program::AssemblyProgram,
};

/// A code section's raw-data extent and mapped address.
struct CodeRegion {
    start: usize,
    end: usize,
    rva: u32,
}

/// Disassembles a 32-bit x86 PE image into an [`AssemblyProgram`].
///
/// # Errors
///
/// Fails with [`Error::InputNotRecognized`] when the input is not a
/// well-formed PE32 x86 image and with [`Error::DisassemblyFailed`] when the
/// image is structurally valid but internally inconsistent (a relocation site
/// or target outside the image).
pub fn parse_pe(buf: &[u8]) -> Result<AssemblyProgram> {
    let pe = PeImage::parse(buf)?;
    let abs32_sites = pe.abs32_sites(buf)?;

    let mut regions: Vec<CodeRegion> = pe
        .sections
        .iter()
        .filter(|s| s.is_code() && s.size_of_raw_data > 0)
        .map(|s| CodeRegion {
            start: s.file_range().start,
            end: s.file_range().end,
            rva: s.virtual_address,
        })
        .collect();
    regions.sort_unstable_by_key(|r| r.start);

    let mut program = AssemblyProgram::new(pe.image_base);
    let mut sites = abs32_sites.iter().copied().peekable();
    let mut region_ix = 0;
    let mut origin_region = usize::MAX;
    let mut run_start = 0;
    let mut pos = 0;

    while pos < buf.len() {
        while region_ix < regions.len() && pos >= regions[region_ix].end {
            region_ix += 1;
        }
        let region = regions.get(region_ix).filter(|r| pos >= r.start);
        if let Some(r) = region
            && origin_region != region_ix
        {
            // A reference consumed just before the section may carry `pos`
            // past its first byte; the origin then names the RVA of `pos`
            // itself.
            program.emit_bytes(&buf[run_start..pos]);
            run_start = pos;
            program.emit_origin(r.rva.wrapping_add((pos - r.start) as u32));
            origin_region = region_ix;
        }

        // Fixup sites overlapped by an already-consumed reference are dropped.
        while let Some(&site) = sites.peek()
            && site < pos
        {
            sites.next();
            debug!("dropping overlapped abs32 site at {site:#x}");
        }

        if sites.peek() == Some(&pos) {
            sites.next();
            let value = LittleEndian::read_u32(&buf[pos..pos + 4]);
            let rva = value.wrapping_sub(pe.image_base);
            if value < pe.image_base || rva >= pe.size_of_image {
                return Err(Error::DisassemblyFailed("relocation target outside image"));
            }
            program.emit_bytes(&buf[run_start..pos]);
            program.emit_abs32(rva);
            pos += 4;
            run_start = pos;
            continue;
        }

        if let Some(r) = region
            && let Some((op_len, disp_off)) = rel32_shape(&buf[pos..r.end])
            && sites.peek().is_none_or(|&s| s >= pos + op_len)
        {
            let disp = LittleEndian::read_i32(&buf[pos + disp_off..]);
            let next_rva = r.rva.wrapping_add((pos + op_len - r.start) as u32);
            let target = next_rva.wrapping_add(disp as u32);
            if target < pe.size_of_image {
                // The opcode bytes stay literal; only the displacement is
                // replaced by a label reference.
                program.emit_bytes(&buf[run_start..pos + disp_off]);
                program.emit_rel32(target);
                pos += op_len;
                run_start = pos;
                continue;
            }
        }

        pos += 1;
    }
    program.emit_bytes(&buf[run_start..]);

    debug!(
        "disassembled {} bytes: {} instructions, {} abs32 labels, {} rel32 labels",
        buf.len(),
        program.instructions().len(),
        program.abs32_labels().len(),
        program.rel32_labels().len(),
    );

    Ok(program)
}

/// Recognizes a near call/jmp/jcc with a rel32 displacement at the start of
/// `code`, returning `(instruction_len, displacement_offset)`.
fn rel32_shape(code: &[u8]) -> Option<(usize, usize)> {
    match code {
        [0xe8 | 0xe9, ..] if code.len() >= 5 => Some((5, 1)),
        [0x0f, second, ..] if (0x80..=0x8f).contains(second) && code.len() >= 6 => Some((6, 2)),
        _ => None,
    }
}
