// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Minimal PE/COFF parsing: just enough of the headers, section table, and
//! base-relocation table to drive the disassembler.
//!
//! Only 32-bit x86 images (machine 0x014C, PE32 optional header) are
//! recognized. Structural problems report [`Error::InputNotRecognized`];
//! a relocation site that escapes the file reports
//! [`Error::DisassemblyFailed`].

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

const DOS_MAGIC: u16 = 0x5a4d; // "MZ"
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const MACHINE_X86: u16 = 0x014c;
const OPTIONAL_MAGIC_PE32: u16 = 0x010b;

const COFF_HEADER_SIZE: usize = 20;
const SECTION_ENTRY_SIZE: usize = 40;
const DIRECTORY_ENTRY_BASE_RELOC: usize = 5;

const SECTION_CHARACTERISTIC_CODE: u32 = 0x0000_0020;
const SECTION_CHARACTERISTIC_EXECUTE: u32 = 0x2000_0000;

const RELOC_TYPE_ABSOLUTE: u16 = 0;
const RELOC_TYPE_HIGHLOW: u16 = 3;

/// One entry of the section table.
#[derive(Clone, Debug)]
pub struct Section {
    /// RVA where the section is mapped.
    pub virtual_address: u32,
    /// Mapped size of the section.
    pub virtual_size: u32,
    /// File offset of the section's raw data.
    pub pointer_to_raw_data: u32,
    /// Size of the section's raw data in the file.
    pub size_of_raw_data: u32,
    /// Section characteristic flags.
    pub characteristics: u32,
}

impl Section {
    /// Returns `true` if the section holds executable code.
    #[must_use]
    pub fn is_code(&self) -> bool {
        self.characteristics & (SECTION_CHARACTERISTIC_CODE | SECTION_CHARACTERISTIC_EXECUTE) != 0
    }

    /// Returns the file-offset range occupied by the section's raw data.
    #[must_use]
    pub fn file_range(&self) -> std::ops::Range<usize> {
        let start = self.pointer_to_raw_data as usize;
        start..start + self.size_of_raw_data as usize
    }
}

/// The header fields and section layout of a validated PE32 image.
#[derive(Debug)]
pub struct PeImage {
    /// Preferred load address of the image.
    pub image_base: u32,
    /// Mapped size of the whole image.
    pub size_of_image: u32,
    /// Size of the header region at the front of the file.
    pub size_of_headers: u32,
    /// The section table, in file order.
    pub sections: Vec<Section>,
    reloc_rva: u32,
    reloc_size: u32,
}

fn read_u16_at(buf: &[u8], offset: usize) -> Result<u16> {
    buf.get(offset..offset + 2)
        .map(LittleEndian::read_u16)
        .ok_or(Error::InputNotRecognized("truncated header"))
}

fn read_u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    buf.get(offset..offset + 4)
        .map(LittleEndian::read_u32)
        .ok_or(Error::InputNotRecognized("truncated header"))
}

impl PeImage {
    /// Validates the DOS, COFF, and PE32 optional headers of `buf` and reads
    /// the section table.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InputNotRecognized`] on anything other than a
    /// well-formed 32-bit x86 PE image.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if read_u16_at(buf, 0)? != DOS_MAGIC {
            return Err(Error::InputNotRecognized("bad DOS magic"));
        }
        let pe_offset = read_u32_at(buf, 0x3c)? as usize;
        if read_u32_at(buf, pe_offset)? != PE_SIGNATURE {
            return Err(Error::InputNotRecognized("bad PE signature"));
        }

        let coff = pe_offset + 4;
        if read_u16_at(buf, coff)? != MACHINE_X86 {
            return Err(Error::InputNotRecognized("not an x86 image"));
        }
        let section_count = read_u16_at(buf, coff + 2)? as usize;
        let optional_size = read_u16_at(buf, coff + 16)? as usize;

        let optional = coff + COFF_HEADER_SIZE;
        if optional_size < 96 {
            return Err(Error::InputNotRecognized("missing optional header"));
        }
        if read_u16_at(buf, optional)? != OPTIONAL_MAGIC_PE32 {
            return Err(Error::InputNotRecognized("not a PE32 optional header"));
        }
        let image_base = read_u32_at(buf, optional + 28)?;
        let size_of_image = read_u32_at(buf, optional + 56)?;
        let size_of_headers = read_u32_at(buf, optional + 60)?;

        let directory_count = read_u32_at(buf, optional + 92)? as usize;
        let (reloc_rva, reloc_size) = if directory_count > DIRECTORY_ENTRY_BASE_RELOC {
            let entry = optional + 96 + DIRECTORY_ENTRY_BASE_RELOC * 8;
            if entry + 8 > optional + optional_size {
                return Err(Error::InputNotRecognized("data directory overruns header"));
            }
            (read_u32_at(buf, entry)?, read_u32_at(buf, entry + 4)?)
        } else {
            (0, 0)
        };

        let table = optional + optional_size;
        let mut sections = Vec::with_capacity(section_count);
        for ix in 0..section_count {
            let entry = table + ix * SECTION_ENTRY_SIZE;
            if entry + SECTION_ENTRY_SIZE > buf.len() {
                return Err(Error::InputNotRecognized("truncated section table"));
            }
            let section = Section {
                virtual_size: read_u32_at(buf, entry + 8)?,
                virtual_address: read_u32_at(buf, entry + 12)?,
                size_of_raw_data: read_u32_at(buf, entry + 16)?,
                pointer_to_raw_data: read_u32_at(buf, entry + 20)?,
                characteristics: read_u32_at(buf, entry + 36)?,
            };
            let range = section.file_range();
            if range.end > buf.len() {
                return Err(Error::InputNotRecognized("section data overruns file"));
            }
            sections.push(section);
        }

        Ok(Self {
            image_base,
            size_of_image,
            size_of_headers,
            sections,
            reloc_rva,
            reloc_size,
        })
    }

    /// Maps an RVA to the file offset backing it, if any.
    #[must_use]
    pub fn rva_to_file_offset(&self, rva: u32) -> Option<usize> {
        for section in &self.sections {
            let va = section.virtual_address;
            if rva >= va && rva - va < section.size_of_raw_data {
                return Some(section.pointer_to_raw_data as usize + (rva - va) as usize);
            }
        }
        // The header region is mapped one-to-one.
        (rva < self.size_of_headers).then_some(rva as usize)
    }

    /// Maps a file offset to the RVA it is loaded at, if any.
    #[must_use]
    pub fn file_offset_to_rva(&self, offset: usize) -> Option<u32> {
        for section in &self.sections {
            let range = section.file_range();
            if range.contains(&offset) {
                return Some(section.virtual_address + (offset - range.start) as u32);
            }
        }
        (offset < self.size_of_headers as usize).then(|| offset as u32)
    }

    /// Walks the base-relocation table and returns the file offsets of every
    /// HIGHLOW (Abs32) fixup site, sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DisassemblyFailed`] if the table is malformed or a
    /// fixup site falls outside the file.
    pub fn abs32_sites(&self, buf: &[u8]) -> Result<Vec<usize>> {
        if self.reloc_size == 0 {
            return Ok(Vec::new());
        }
        let start = self
            .rva_to_file_offset(self.reloc_rva)
            .ok_or(Error::DisassemblyFailed("relocation table outside file"))?;
        let table = buf
            .get(start..start + self.reloc_size as usize)
            .ok_or(Error::DisassemblyFailed("relocation table overruns file"))?;

        let mut sites = Vec::new();
        let mut pos = 0;
        while pos + 8 <= table.len() {
            let page_rva = LittleEndian::read_u32(&table[pos..]);
            let block_size = LittleEndian::read_u32(&table[pos + 4..]) as usize;
            if block_size < 8 || pos + block_size > table.len() {
                return Err(Error::DisassemblyFailed("malformed relocation block"));
            }
            for entry_pos in (pos + 8..pos + block_size).step_by(2) {
                let entry = LittleEndian::read_u16(&table[entry_pos..]);
                let kind = entry >> 12;
                if kind == RELOC_TYPE_ABSOLUTE {
                    continue; // alignment padding
                }
                if kind != RELOC_TYPE_HIGHLOW {
                    continue; // carried through as plain bytes
                }
                let rva = page_rva
                    .checked_add(u32::from(entry & 0x0fff))
                    .ok_or(Error::DisassemblyFailed("relocation RVA overflow"))?;
                let offset = self
                    .rva_to_file_offset(rva)
                    .ok_or(Error::DisassemblyFailed("relocation site outside image"))?;
                if offset + 4 > buf.len() {
                    return Err(Error::DisassemblyFailed("relocation site overruns file"));
                }
                sites.push(offset);
            }
            pos += block_size;
        }

        sites.sort_unstable();
        sites.dedup();
        Ok(sites)
    }
}
