// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The address-independent intermediate representation of a disassembled
//! executable.
//!
//! An [`AssemblyProgram`] is an ordered instruction list plus two label
//! tables. Replaying the instructions with every label reference resolved to
//! its target's literal 32-bit value reproduces the original file exactly;
//! that invariant is what the whole pipeline is built on.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A deduplicated reference target with its assigned encoding index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Label {
    /// The target address (an RVA for both label kinds).
    pub address: u32,
    /// The dense index used when encoding references to this label.
    pub index: u32,
}

/// An arena of labels, deduplicated by target address.
///
/// Labels live in a dense vector indexed by id; a side map from address to id
/// handles deduplication. Ids are handed out in first-reference order, so a
/// freshly built table has `index == id` for every label (the "natural"
/// assignment the adjuster later rewrites).
#[derive(Default)]
pub struct LabelTable {
    labels: Vec<Label>,
    by_address: HashMap<u32, u32>,
}

impl LabelTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of labels in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if the table holds no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the id for `address`, creating a label with a fresh natural
    /// index on first reference.
    pub fn intern(&mut self, address: u32) -> u32 {
        if let Some(&id) = self.by_address.get(&address) {
            return id;
        }
        let id = self.labels.len() as u32;
        self.labels.push(Label { address, index: id });
        self.by_address.insert(address, id);
        id
    }

    /// Looks up a label by id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Label> {
        self.labels.get(id as usize)
    }

    /// Looks up the id of the label for `address`, if one exists.
    #[must_use]
    pub fn id_by_address(&self, address: u32) -> Option<u32> {
        self.by_address.get(&address).copied()
    }

    /// Overwrites the encoding index of label `id`.
    pub(crate) fn set_index(&mut self, id: u32, index: u32) {
        self.labels[id as usize].index = index;
    }

    /// Iterates over the labels in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Returns the addresses arranged by encoding index.
    ///
    /// # Errors
    ///
    /// Fails if the indices are not a permutation of `0..len`, which only an
    /// adjuster bug can produce.
    pub fn addresses_by_index(&self) -> Result<Vec<u32>> {
        let mut addresses = vec![None; self.labels.len()];
        for label in &self.labels {
            let slot = addresses
                .get_mut(label.index as usize)
                .ok_or(Error::AdjustmentFailed("label index out of range"))?;
            if slot.replace(label.address).is_some() {
                return Err(Error::AdjustmentFailed("duplicate label index"));
            }
        }
        // Every slot is filled: len slots, len distinct indices.
        Ok(addresses.into_iter().flatten().collect())
    }
}

/// One instruction of an [`AssemblyProgram`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction {
    /// Sets the current RVA for rel32 displacement arithmetic.
    Origin(u32),
    /// Copies the next `len` bytes of the literal pool verbatim.
    Bytes {
        /// Number of literal bytes.
        len: u32,
    },
    /// Emits the 32-bit absolute address of the abs32 label with this id.
    Abs32(u32),
    /// Emits the 32-bit displacement to the rel32 label with this id.
    Rel32(u32),
}

/// An ordered instruction sequence, its label tables, literal pool, and the
/// image base of the executable it was disassembled from.
pub struct AssemblyProgram {
    image_base: u32,
    instructions: Vec<Instruction>,
    literals: Vec<u8>,
    abs32: LabelTable,
    rel32: LabelTable,
}

impl AssemblyProgram {
    /// Creates an empty program for an image loaded at `image_base`.
    #[must_use]
    pub fn new(image_base: u32) -> Self {
        Self {
            image_base,
            instructions: Vec::new(),
            literals: Vec::new(),
            abs32: LabelTable::new(),
            rel32: LabelTable::new(),
        }
    }

    /// Returns the image base recorded at construction.
    #[must_use]
    pub fn image_base(&self) -> u32 {
        self.image_base
    }

    /// Returns the instruction sequence.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the literal byte pool backing the byte-run instructions.
    #[must_use]
    pub fn literals(&self) -> &[u8] {
        &self.literals
    }

    /// Returns the abs32 label table.
    #[must_use]
    pub fn abs32_labels(&self) -> &LabelTable {
        &self.abs32
    }

    /// Returns the rel32 label table.
    #[must_use]
    pub fn rel32_labels(&self) -> &LabelTable {
        &self.rel32
    }

    pub(crate) fn abs32_labels_mut(&mut self) -> &mut LabelTable {
        &mut self.abs32
    }

    pub(crate) fn rel32_labels_mut(&mut self) -> &mut LabelTable {
        &mut self.rel32
    }

    /// Consumes the program, yielding its literal byte pool.
    #[must_use]
    pub fn into_literals(self) -> Vec<u8> {
        self.literals
    }

    /// Records the RVA at which the following instructions are mapped.
    pub fn emit_origin(&mut self, rva: u32) {
        self.instructions.push(Instruction::Origin(rva));
    }

    /// Appends an opaque byte run, coalescing with a preceding run.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.literals.extend_from_slice(bytes);
        if let Some(Instruction::Bytes { len }) = self.instructions.last_mut() {
            *len += bytes.len() as u32;
        } else {
            self.instructions.push(Instruction::Bytes {
                len: bytes.len() as u32,
            });
        }
    }

    /// Appends a reference to the absolute address whose RVA is `target_rva`.
    pub fn emit_abs32(&mut self, target_rva: u32) {
        let id = self.abs32.intern(target_rva);
        self.instructions.push(Instruction::Abs32(id));
    }

    /// Appends a relative reference to `target_rva`.
    pub fn emit_rel32(&mut self, target_rva: u32) {
        let id = self.rel32.intern(target_rva);
        self.instructions.push(Instruction::Rel32(id));
    }
}
