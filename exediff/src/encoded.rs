// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The partitioned, serializable form of an [`AssemblyProgram`], and the
//! assembler that turns it back into raw bytes.
//!
//! Encoding re-sorts the instruction list into homogeneous parallel streams
//! so that values of the same statistical kind sit adjacently; that locality
//! is what lets the downstream byte diff stay small across insertions and
//! deletions. Assembly is the exact inverse of disassembly plus encoding.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    error::{Error, Result},
    program::{AssemblyProgram, Instruction},
    stream::{SinkStream, SinkStreamSet, SourceStream, SourceStreamSet},
};

const STREAM_HEADER: usize = 0;
const STREAM_OPS: usize = 1;
const STREAM_ORIGINS: usize = 2;
const STREAM_COPY_COUNTS: usize = 3;
const STREAM_ABS32_ADDRESSES: usize = 4;
const STREAM_ABS32_INDEXES: usize = 5;
const STREAM_REL32_ADDRESSES: usize = 6;
const STREAM_REL32_INDEXES: usize = 7;
const STREAM_DATA: usize = 8;

/// Number of streams in a serialized encoded program.
pub const STREAM_COUNT: usize = 9;

const OP_ORIGIN: u8 = 0x01;
const OP_COPY: u8 = 0x02;
const OP_ABS32: u8 = 0x03;
const OP_REL32: u8 = 0x04;

/// An [`AssemblyProgram`] re-partitioned into homogeneous parallel arrays.
///
/// No value is duplicated across streams, and decoding a serialized form is
/// total and deterministic.
pub struct EncodedProgram {
    image_base: u32,
    ops: Vec<u8>,
    origins: Vec<u32>,
    copy_counts: Vec<u32>,
    abs32_addresses: Vec<u32>,
    abs32_indexes: Vec<u32>,
    rel32_addresses: Vec<u32>,
    rel32_indexes: Vec<u32>,
    data: Vec<u8>,
}

impl EncodedProgram {
    /// Re-partitions `program` into encoded form, consuming it.
    ///
    /// # Errors
    ///
    /// Fails only when a label table's index assignment is not a permutation,
    /// which a correct disassembler or adjuster never produces.
    pub fn from_program(program: AssemblyProgram) -> Result<Self> {
        let abs32_addresses = program.abs32_labels().addresses_by_index()?;
        let rel32_addresses = program.rel32_labels().addresses_by_index()?;

        let mut encoded = Self {
            image_base: program.image_base(),
            ops: Vec::with_capacity(program.instructions().len()),
            origins: Vec::new(),
            copy_counts: Vec::new(),
            abs32_addresses,
            abs32_indexes: Vec::new(),
            rel32_addresses,
            rel32_indexes: Vec::new(),
            data: Vec::new(),
        };

        for instruction in program.instructions() {
            match *instruction {
                Instruction::Origin(rva) => {
                    encoded.ops.push(OP_ORIGIN);
                    encoded.origins.push(rva);
                }
                Instruction::Bytes { len } => {
                    encoded.ops.push(OP_COPY);
                    encoded.copy_counts.push(len);
                }
                Instruction::Abs32(id) => {
                    let label = program
                        .abs32_labels()
                        .get(id)
                        .ok_or(Error::SerializationFailed("dangling abs32 label id"))?;
                    encoded.ops.push(OP_ABS32);
                    encoded.abs32_indexes.push(label.index);
                }
                Instruction::Rel32(id) => {
                    let label = program
                        .rel32_labels()
                        .get(id)
                        .ok_or(Error::SerializationFailed("dangling rel32 label id"))?;
                    encoded.ops.push(OP_REL32);
                    encoded.rel32_indexes.push(label.index);
                }
            }
        }
        encoded.data = program.into_literals();

        Ok(encoded)
    }

    /// Serializes the program as a stream set: varint stream count, one
    /// varint length per stream, then the concatenated stream bodies.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::SerializationFailed`] on index or length overflow.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.to_stream_set()?.serialize()
    }

    /// Returns the serialized body of each stream individually, in stream
    /// order. The ensemble layer diffs these one pair at a time.
    ///
    /// # Errors
    ///
    /// See [`EncodedProgram::serialize`].
    pub fn stream_bodies(&self) -> Result<Vec<Vec<u8>>> {
        let mut set = self.to_stream_set()?;
        Ok((0..STREAM_COUNT)
            .map(|ix| set.stream(ix).as_bytes().to_vec())
            .collect())
    }

    /// Reconstructs an encoded program from per-stream bodies produced by
    /// [`EncodedProgram::stream_bodies`] (or patched copies of them).
    ///
    /// # Errors
    ///
    /// Fails like [`EncodedProgram::deserialize`] when the bodies are
    /// malformed or mutually inconsistent.
    pub fn from_stream_bodies(bodies: &[Vec<u8>]) -> Result<Self> {
        if bodies.len() != STREAM_COUNT {
            return Err(Error::DeserializationFailed("wrong stream count"));
        }
        let mut set = SinkStreamSet::with_streams(STREAM_COUNT);
        for (ix, body) in bodies.iter().enumerate() {
            set.stream(ix).write(body);
        }
        Self::deserialize(&set.serialize()?)
    }

    fn to_stream_set(&self) -> Result<SinkStreamSet> {
        let mut set = SinkStreamSet::with_streams(STREAM_COUNT);

        set.stream(STREAM_HEADER).write_varint32(self.image_base);
        set.stream(STREAM_OPS).write(&self.ops);
        for &rva in &self.origins {
            set.stream(STREAM_ORIGINS).write_varint32(rva);
        }
        for &count in &self.copy_counts {
            set.stream(STREAM_COPY_COUNTS).write_varint32(count);
        }
        write_address_table(set.stream(STREAM_ABS32_ADDRESSES), &self.abs32_addresses)?;
        for &index in &self.abs32_indexes {
            set.stream(STREAM_ABS32_INDEXES).write_varint32(index);
        }
        write_address_table(set.stream(STREAM_REL32_ADDRESSES), &self.rel32_addresses)?;
        for &index in &self.rel32_indexes {
            set.stream(STREAM_REL32_INDEXES).write_varint32(index);
        }
        set.stream(STREAM_DATA).write(&self.data);

        Ok(set)
    }

    /// Parses a serialized encoded program.
    ///
    /// Every stream must be internally consistent and fully consumed; the tag
    /// stream's per-op counts must match the lengths of the parallel streams.
    ///
    /// # Errors
    ///
    /// Fails with stream or deserialization errors on truncated or malformed
    /// input. Never reads outside the given buffer.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        let mut set = SourceStreamSet::parse(buf)?;
        if set.stream_count() != STREAM_COUNT {
            return Err(Error::DeserializationFailed("wrong stream count"));
        }

        let header = set.stream(STREAM_HEADER)?;
        let image_base = header.read_varint32()?;
        if !header.is_empty() {
            return Err(Error::StreamNotConsumed);
        }

        let ops = set.stream(STREAM_OPS)?.read_rest().to_vec();

        let mut tag_counts = [0usize; 4];
        for &op in &ops {
            match op {
                OP_ORIGIN | OP_COPY | OP_ABS32 | OP_REL32 => {
                    tag_counts[(op - OP_ORIGIN) as usize] += 1;
                }
                _ => return Err(Error::DeserializationFailed("unknown op tag")),
            }
        }

        let origins = read_varints(set.stream(STREAM_ORIGINS)?)?;
        let copy_counts = read_varints(set.stream(STREAM_COPY_COUNTS)?)?;
        let abs32_addresses = read_address_table(set.stream(STREAM_ABS32_ADDRESSES)?)?;
        let abs32_indexes = read_varints(set.stream(STREAM_ABS32_INDEXES)?)?;
        let rel32_addresses = read_address_table(set.stream(STREAM_REL32_ADDRESSES)?)?;
        let rel32_indexes = read_varints(set.stream(STREAM_REL32_INDEXES)?)?;
        let data = set.stream(STREAM_DATA)?.read_rest().to_vec();

        if origins.len() != tag_counts[(OP_ORIGIN - OP_ORIGIN) as usize]
            || copy_counts.len() != tag_counts[(OP_COPY - OP_ORIGIN) as usize]
            || abs32_indexes.len() != tag_counts[(OP_ABS32 - OP_ORIGIN) as usize]
            || rel32_indexes.len() != tag_counts[(OP_REL32 - OP_ORIGIN) as usize]
        {
            return Err(Error::DeserializationFailed("op counts disagree with streams"));
        }
        let copied: u64 = copy_counts.iter().map(|&c| u64::from(c)).sum();
        if copied != data.len() as u64 {
            return Err(Error::DeserializationFailed("copy counts disagree with data"));
        }

        Ok(Self {
            image_base,
            ops,
            origins,
            copy_counts,
            abs32_addresses,
            abs32_indexes,
            rel32_addresses,
            rel32_indexes,
            data,
        })
    }

    /// Reassembles the original executable bytes.
    ///
    /// Walks the tag stream, copying literal bytes for each copy op and
    /// emitting the 32-bit value looked up in the matching address table for
    /// each reference op, while tracking the current RVA for rel32
    /// displacement arithmetic.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AssemblyFailed`] when the tables are internally
    /// inconsistent: an index with no address-table entry, or a rel32 emitted
    /// before any origin is established.
    pub fn assemble(&self) -> Result<Vec<u8>> {
        let mut out =
            Vec::with_capacity(self.data.len() + 4 * (self.abs32_indexes.len() + self.rel32_indexes.len()));

        let mut origins = self.origins.iter();
        let mut copy_counts = self.copy_counts.iter();
        let mut abs32_indexes = self.abs32_indexes.iter();
        let mut rel32_indexes = self.rel32_indexes.iter();
        let mut data_pos = 0usize;
        let mut current_rva: Option<u32> = None;

        let mut scratch = [0u8; 4];
        for &op in &self.ops {
            match op {
                OP_ORIGIN => {
                    current_rva = Some(
                        *origins
                            .next()
                            .ok_or(Error::AssemblyFailed("origin stream exhausted"))?,
                    );
                }
                OP_COPY => {
                    let count = *copy_counts
                        .next()
                        .ok_or(Error::AssemblyFailed("copy-count stream exhausted"))?
                        as usize;
                    let bytes = self
                        .data
                        .get(data_pos..data_pos + count)
                        .ok_or(Error::AssemblyFailed("literal pool exhausted"))?;
                    out.extend_from_slice(bytes);
                    data_pos += count;
                    current_rva = current_rva.map(|rva| rva.wrapping_add(count as u32));
                }
                OP_ABS32 => {
                    let index = *abs32_indexes
                        .next()
                        .ok_or(Error::AssemblyFailed("abs32 index stream exhausted"))?;
                    let rva = *self
                        .abs32_addresses
                        .get(index as usize)
                        .ok_or(Error::AssemblyFailed("abs32 index out of table"))?;
                    LittleEndian::write_u32(&mut scratch, self.image_base.wrapping_add(rva));
                    out.extend_from_slice(&scratch);
                    current_rva = current_rva.map(|rva| rva.wrapping_add(4));
                }
                OP_REL32 => {
                    let index = *rel32_indexes
                        .next()
                        .ok_or(Error::AssemblyFailed("rel32 index stream exhausted"))?;
                    let target = *self
                        .rel32_addresses
                        .get(index as usize)
                        .ok_or(Error::AssemblyFailed("rel32 index out of table"))?;
                    let rva = current_rva.ok_or(Error::AssemblyFailed("rel32 before origin"))?;
                    LittleEndian::write_u32(&mut scratch, target.wrapping_sub(rva.wrapping_add(4)));
                    out.extend_from_slice(&scratch);
                    current_rva = Some(rva.wrapping_add(4));
                }
                _ => return Err(Error::AssemblyFailed("unknown op tag")),
            }
        }

        Ok(out)
    }
}

/// Writes an address table: element count, then the addresses in index order
/// as wrapping signed deltas from the previous entry.
fn write_address_table(sink: &mut SinkStream, addresses: &[u32]) -> Result<()> {
    let count = u32::try_from(addresses.len())
        .map_err(|_| Error::SerializationFailed("address table overflow"))?;
    sink.write_varint32(count);
    let mut previous = 0u32;
    for &address in addresses {
        sink.write_varint32_signed(address.wrapping_sub(previous) as i32);
        previous = address;
    }
    Ok(())
}

fn read_address_table(source: &mut SourceStream) -> Result<Vec<u32>> {
    let count = source.read_varint32()? as usize;
    // A table can never be larger than its encoding: one byte per delta.
    if count > source.remaining() {
        return Err(Error::DeserializationFailed("address table count overflow"));
    }
    let mut addresses = Vec::with_capacity(count);
    let mut previous = 0u32;
    for _ in 0..count {
        previous = previous.wrapping_add(source.read_varint32_signed()? as u32);
        addresses.push(previous);
    }
    if !source.is_empty() {
        return Err(Error::StreamNotConsumed);
    }
    Ok(addresses)
}

fn read_varints(source: &mut SourceStream) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    while !source.is_empty() {
        values.push(source.read_varint32()?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjust::adjust;

    fn sample_program() -> AssemblyProgram {
        let mut program = AssemblyProgram::new(0x40_0000);
        program.emit_origin(0x1000);
        program.emit_bytes(&[0xe8]);
        program.emit_rel32(0x1234);
        program.emit_bytes(b"data");
        program.emit_abs32(0x2000);
        program
    }

    fn expected_sample_bytes() -> Vec<u8> {
        let mut expected = vec![0xe8];
        // rel32: target 0x1234 from rva 0x1001, displacement excludes itself.
        expected.extend_from_slice(&0x1234u32.wrapping_sub(0x1001 + 4).to_le_bytes());
        expected.extend_from_slice(b"data");
        expected.extend_from_slice(&0x40_2000u32.to_le_bytes());
        expected
    }

    #[test]
    fn encode_assemble_round_trip() {
        let encoded = EncodedProgram::from_program(sample_program()).unwrap();

        assert_eq!(encoded.assemble().unwrap(), expected_sample_bytes());
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let encoded = EncodedProgram::from_program(sample_program()).unwrap();
        let serialized = encoded.serialize().unwrap();

        let decoded = EncodedProgram::deserialize(&serialized).unwrap();

        assert_eq!(decoded.assemble().unwrap(), expected_sample_bytes());
        assert_eq!(decoded.serialize().unwrap(), serialized);
    }

    /// Programs differing only in which natural index names which address
    /// serialize identically once adjusted (the equalization contract).
    #[test]
    fn adjustment_equalizes_serializations() {
        fn build() -> AssemblyProgram {
            let mut p = AssemblyProgram::new(0x40_0000);
            p.emit_abs32(0x1000);
            p.emit_abs32(0x2000);
            p.emit_abs32(0x1000);
            p
        }
        // Identical to `build()` except that the two labels swap which index
        // names which address; the assembled bytes are unaffected.
        fn build_swapped() -> AssemblyProgram {
            let mut p = build();
            p.abs32_labels_mut().set_index(0, 1);
            p.abs32_labels_mut().set_index(1, 0);
            p
        }
        fn serialize(p: AssemblyProgram) -> Vec<u8> {
            EncodedProgram::from_program(p).unwrap().serialize().unwrap()
        }

        let model_bytes = serialize(build());
        assert_ne!(
            model_bytes,
            serialize(build_swapped()),
            "swapped indices must change the serialization"
        );
        assert_eq!(
            EncodedProgram::from_program(build()).unwrap().assemble().unwrap(),
            EncodedProgram::from_program(build_swapped()).unwrap().assemble().unwrap(),
            "swapped indices must not change the assembled bytes"
        );

        let mut subject = build_swapped();
        adjust(&build(), &mut subject).unwrap();

        assert_eq!(serialize(subject), model_bytes);
    }

    #[test]
    fn deserialize_rejects_wrong_stream_count() {
        let mut set = SinkStreamSet::with_streams(3);
        set.stream(0).write_varint32(0x40_0000);
        let buf = set.serialize().unwrap();

        assert!(matches!(
            EncodedProgram::deserialize(&buf),
            Err(Error::DeserializationFailed(_))
        ));
    }

    #[test]
    fn deserialize_rejects_truncation() {
        let serialized = EncodedProgram::from_program(sample_program())
            .unwrap()
            .serialize()
            .unwrap();

        for cut in [0, 1, serialized.len() / 2, serialized.len() - 1] {
            assert!(
                EncodedProgram::deserialize(&serialized[..cut]).is_err(),
                "truncation at {cut} must not decode"
            );
        }
    }
}
