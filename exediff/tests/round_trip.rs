// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! End-to-end round trips over synthetic PE32 fixtures.

#![allow(missing_docs)]

use exediff::EncodedProgram;

const IMAGE_BASE: u32 = 0x40_0000;
const TEXT_RVA: u32 = 0x1000;
const TEXT_RAW: usize = 0x200;
const RELOC_RVA: u32 = 0x3000;
const RELOC_RAW: usize = 0x400;

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Builds a minimal but well-formed PE32 x86 image with one code section and
/// one relocation section.
///
/// `code` lands at RVA 0x1000; `reloc_rvas` lists the abs32 fixup sites.
fn build_pe(code: &[u8], reloc_rvas: &[u32]) -> Vec<u8> {
    assert!(code.len() <= 0x200, "code section overflow");

    let mut f = vec![0u8; 0x600];

    // DOS header
    f[0] = b'M';
    f[1] = b'Z';
    put_u32(&mut f, 0x3c, 0x40);

    // PE signature + COFF header
    f[0x40..0x44].copy_from_slice(b"PE\0\0");
    put_u16(&mut f, 0x44, 0x014c); // machine: x86
    put_u16(&mut f, 0x46, 2); // section count
    put_u16(&mut f, 0x54, 224); // optional header size
    put_u16(&mut f, 0x56, 0x0102); // characteristics

    // PE32 optional header
    let opt = 0x58;
    put_u16(&mut f, opt, 0x010b);
    put_u32(&mut f, opt + 28, IMAGE_BASE);
    put_u32(&mut f, opt + 32, 0x1000); // section alignment
    put_u32(&mut f, opt + 36, 0x200); // file alignment
    put_u32(&mut f, opt + 56, 0x4000); // size of image
    put_u32(&mut f, opt + 60, 0x200); // size of headers
    put_u32(&mut f, opt + 92, 16); // data directory count
    put_u32(&mut f, opt + 96 + 5 * 8, RELOC_RVA);

    // Section table
    let table = opt + 224;
    f[table..table + 5].copy_from_slice(b".text");
    put_u32(&mut f, table + 8, 0x200);
    put_u32(&mut f, table + 12, TEXT_RVA);
    put_u32(&mut f, table + 16, 0x200);
    put_u32(&mut f, table + 20, TEXT_RAW as u32);
    put_u32(&mut f, table + 36, 0x6000_0020); // code | execute | read

    let entry = table + 40;
    f[entry..entry + 6].copy_from_slice(b".reloc");
    put_u32(&mut f, entry + 8, 0x200);
    put_u32(&mut f, entry + 12, RELOC_RVA);
    put_u32(&mut f, entry + 16, 0x200);
    put_u32(&mut f, entry + 20, RELOC_RAW as u32);
    put_u32(&mut f, entry + 36, 0x4200_0040); // initialized data | discardable | read

    f[TEXT_RAW..TEXT_RAW + code.len()].copy_from_slice(code);

    // One relocation block covering the code page, padded to a multiple of 4.
    let mut entries: Vec<u16> = reloc_rvas
        .iter()
        .map(|&rva| {
            assert!(rva >= TEXT_RVA && rva < TEXT_RVA + 0x1000, "site outside code page");
            (3 << 12) | (rva - TEXT_RVA) as u16
        })
        .collect();
    if entries.len() % 2 == 1 {
        entries.push(0); // absolute padding entry
    }
    let block_size = 8 + 2 * entries.len();
    put_u32(&mut f, RELOC_RAW, TEXT_RVA);
    put_u32(&mut f, RELOC_RAW + 4, block_size as u32);
    for (ix, entry) in entries.iter().enumerate() {
        put_u16(&mut f, RELOC_RAW + 8 + 2 * ix, *entry);
    }
    put_u32(&mut f, opt + 96 + 5 * 8 + 4, block_size as u32);

    f
}

/// A small code section with rel32 branches and one abs32 data reference.
fn code_v1() -> (Vec<u8>, Vec<u32>) {
    let mut code = vec![0x55, 0x8b, 0xec]; // push ebp; mov ebp, esp
    // call 0x1020
    code.push(0xe8);
    let next = TEXT_RVA + code.len() as u32 + 4;
    code.extend_from_slice(&(0x1020u32.wrapping_sub(next)).to_le_bytes());
    // mov eax, [0x403000]
    let site = TEXT_RVA + code.len() as u32 + 1;
    code.push(0xa1);
    code.extend_from_slice(&(IMAGE_BASE + RELOC_RVA).to_le_bytes());
    // jz 0x1040
    code.extend_from_slice(&[0x0f, 0x84]);
    let next = TEXT_RVA + code.len() as u32 + 4;
    code.extend_from_slice(&(0x1040u32.wrapping_sub(next)).to_le_bytes());
    code.push(0xc3); // ret
    code.resize(0x80, 0x90);

    (code, vec![site])
}

/// A second version: the same routines with a few bytes inserted and one
/// branch retargeted, the way a rebuilt binary shifts.
fn code_v2() -> (Vec<u8>, Vec<u32>) {
    let mut code = vec![0x55, 0x8b, 0xec, 0x90, 0x90]; // extra nops
    // call 0x1030
    code.push(0xe8);
    let next = TEXT_RVA + code.len() as u32 + 4;
    code.extend_from_slice(&(0x1030u32.wrapping_sub(next)).to_le_bytes());
    // mov eax, [0x403000]
    let site = TEXT_RVA + code.len() as u32 + 1;
    code.push(0xa1);
    code.extend_from_slice(&(IMAGE_BASE + RELOC_RVA).to_le_bytes());
    // jz 0x1040
    code.extend_from_slice(&[0x0f, 0x84]);
    let next = TEXT_RVA + code.len() as u32 + 4;
    code.extend_from_slice(&(0x1040u32.wrapping_sub(next)).to_le_bytes());
    // call 0x1020
    code.push(0xe8);
    let next = TEXT_RVA + code.len() as u32 + 4;
    code.extend_from_slice(&(0x1020u32.wrapping_sub(next)).to_le_bytes());
    code.push(0xc3);
    code.resize(0x80, 0x90);

    (code, vec![site])
}

fn exe_v1() -> Vec<u8> {
    let (code, sites) = code_v1();
    build_pe(&code, &sites)
}

fn exe_v2() -> Vec<u8> {
    let (code, sites) = code_v2();
    build_pe(&code, &sites)
}

#[test]
fn disassembly_round_trip() {
    let exe = exe_v1();

    let program = exediff::parse_pe(&exe).unwrap();
    assert!(!program.abs32_labels().is_empty(), "fixture must produce abs32 labels");
    assert!(!program.rel32_labels().is_empty(), "fixture must produce rel32 labels");

    let encoded = EncodedProgram::from_program(program).unwrap();
    let serialized = encoded.serialize().unwrap();
    let decoded = EncodedProgram::deserialize(&serialized).unwrap();

    assert_eq!(decoded.assemble().unwrap(), exe);
}

#[test]
fn disassembly_round_trip_after_adjustment() {
    let model = exediff::parse_pe(&exe_v1()).unwrap();
    let exe = exe_v2();
    let mut program = exediff::parse_pe(&exe).unwrap();

    exediff::adjust(&model, &mut program).unwrap();
    let reassembled = EncodedProgram::from_program(program)
        .unwrap()
        .assemble()
        .unwrap();

    // Adjustment permutes indices but never changes the assembled bytes.
    assert_eq!(reassembled, exe);
}

#[test]
fn ensemble_round_trip_executables() {
    let old = exe_v1();
    let new = exe_v2();

    let patch = exediff::generate_ensemble_patch(&old, &new).unwrap();
    assert_eq!(exediff::apply_ensemble_patch(&old, &patch).unwrap(), new);
}

#[test]
fn ensemble_round_trip_non_executables() {
    let old = b"just some text, version one".to_vec();
    let new = b"just some text, version two, longer".to_vec();

    let patch = exediff::generate_ensemble_patch(&old, &new).unwrap();
    assert_eq!(exediff::apply_ensemble_patch(&old, &patch).unwrap(), new);
}

#[test]
fn ensemble_round_trip_executable_to_garbage() {
    // One side disassembles, the other does not: the fallback still covers it.
    let old = exe_v1();
    let new = vec![0xabu8; 700];

    let patch = exediff::generate_ensemble_patch(&old, &new).unwrap();
    assert_eq!(exediff::apply_ensemble_patch(&old, &patch).unwrap(), new);
}

#[test]
fn bsdiff_round_trip_on_executables() {
    let old = exe_v1();
    let new = exe_v2();

    let patch = exediff::create_binary_patch(&old, &new).unwrap();
    assert_eq!(exediff::apply_binary_patch(&old, &patch).unwrap(), new);
}

/// Flipping any single byte of an ensemble patch must either fail cleanly or
/// apply without panicking; it must never crash.
#[test]
fn corrupted_ensemble_patch_never_panics() {
    let old = exe_v1();
    let patch = exediff::generate_ensemble_patch(&old, &exe_v2()).unwrap();

    for ix in 0..patch.len() {
        let mut corrupted = patch.clone();
        corrupted[ix] ^= 0xff;
        let _ = exediff::apply_ensemble_patch(&old, &corrupted);
    }
}

/// Flipping any single byte of a serialized encoded program must either fail
/// cleanly or succeed without panicking; it must never crash.
#[test]
fn corrupted_encoded_program_never_panics() {
    let exe = exe_v1();
    let program = exediff::parse_pe(&exe).unwrap();
    let serialized = EncodedProgram::from_program(program)
        .unwrap()
        .serialize()
        .unwrap();

    for ix in 0..serialized.len() {
        let mut corrupted = serialized.clone();
        corrupted[ix] ^= 0xff;
        if let Ok(decoded) = EncodedProgram::deserialize(&corrupted) {
            // A decode that still succeeds must also assemble without panicking.
            let _ = decoded.assemble();
        }
    }
}
