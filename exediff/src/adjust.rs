// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Label index adjustment.
//!
//! Two builds of near-identical programs assign different natural indices to
//! equivalent labels purely because of traversal order, which wrecks the
//! byte-level similarity of their encodings. [`adjust`] rewrites the
//! subject's label indices to agree with the model's wherever a
//! correspondence can be found, without changing any label's target address
//! or any byte of the assembled output.

use log::debug;

use crate::{
    error::{Error, Result},
    program::{AssemblyProgram, Instruction, LabelTable},
};

/// Reassigns `subject`'s label indices to match structurally corresponding
/// labels in `model`.
///
/// Matching runs in three passes per label kind: exact target-address
/// adoption, a lock-step walk of the two programs' reference sequences, and a
/// free-slot fill for everything left. The result is always a permutation of
/// `0..n`; labels with no correspondence keep their natural index when it is
/// still free.
///
/// # Errors
///
/// Fails with [`Error::AdjustmentFailed`] only on an internal invariant
/// violation. An absent correspondence is never an error.
pub fn adjust(model: &AssemblyProgram, subject: &mut AssemblyProgram) -> Result<()> {
    let model_abs32 = reference_sequence(model, RefKind::Abs32);
    let model_rel32 = reference_sequence(model, RefKind::Rel32);
    let subject_abs32 = reference_sequence(subject, RefKind::Abs32);
    let subject_rel32 = reference_sequence(subject, RefKind::Rel32);

    adjust_table(
        model.abs32_labels(),
        &model_abs32,
        subject.abs32_labels_mut(),
        &subject_abs32,
    )?;
    adjust_table(
        model.rel32_labels(),
        &model_rel32,
        subject.rel32_labels_mut(),
        &subject_rel32,
    )
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum RefKind {
    Abs32,
    Rel32,
}

/// Collects the label ids referenced by `program`, in instruction order.
fn reference_sequence(program: &AssemblyProgram, kind: RefKind) -> Vec<u32> {
    program
        .instructions()
        .iter()
        .filter_map(|instruction| match (kind, instruction) {
            (RefKind::Abs32, Instruction::Abs32(id)) => Some(*id),
            (RefKind::Rel32, Instruction::Rel32(id)) => Some(*id),
            _ => None,
        })
        .collect()
}

fn adjust_table(
    model: &LabelTable,
    model_refs: &[u32],
    subject: &mut LabelTable,
    subject_refs: &[u32],
) -> Result<()> {
    let n = subject.len();
    let mut assigned: Vec<Option<u32>> = vec![None; n];
    let mut taken = vec![false; n];

    let mut claim = |assigned: &mut Vec<Option<u32>>, taken: &mut Vec<bool>, id: u32, want: u32| {
        let slot = &mut assigned[id as usize];
        if slot.is_none() && (want as usize) < n && !taken[want as usize] {
            *slot = Some(want);
            taken[want as usize] = true;
        }
    };

    // Pass 1: labels pointing at an address the model also references adopt
    // the model's index outright.
    for (id, label) in subject.iter().enumerate() {
        if let Some(model_id) = model.id_by_address(label.address)
            && let Some(model_label) = model.get(model_id)
        {
            claim(&mut assigned, &mut taken, id as u32, model_label.index);
        }
    }

    // Pass 2: walk the reference sequences in lock-step and unify labels at
    // structurally aligned positions.
    for (&model_id, &subject_id) in model_refs.iter().zip(subject_refs.iter()) {
        if let Some(model_label) = model.get(model_id) {
            claim(&mut assigned, &mut taken, subject_id, model_label.index);
        }
    }

    // Pass 3: unmatched labels keep their natural index when free, then take
    // the smallest unused index.
    for id in 0..n {
        claim(&mut assigned, &mut taken, id as u32, id as u32);
    }
    let adopted = assigned.iter().filter(|slot| slot.is_some()).count();
    let mut free = (0..n as u32).filter(|&ix| !taken[ix as usize]);
    for slot in &mut assigned {
        if slot.is_none() {
            *slot = Some(
                free.next()
                    .ok_or(Error::AdjustmentFailed("ran out of free indices"))?,
            );
        }
    }

    for (id, slot) in assigned.iter().enumerate() {
        let index = slot.ok_or(Error::AdjustmentFailed("unassigned label"))?;
        subject.set_index(id as u32, index);
    }
    debug!("adjusted {n} labels, {adopted} placed before sequential fill");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two programs referencing the same addresses in a different first-seen
    /// order end up with the model's index assignment.
    #[test]
    fn address_matches_adopt_model_indices() {
        let mut model = AssemblyProgram::new(0x40_0000);
        model.emit_abs32(0x1000); // index 0
        model.emit_abs32(0x2000); // index 1

        let mut subject = AssemblyProgram::new(0x40_0000);
        subject.emit_abs32(0x2000); // natural index 0
        subject.emit_abs32(0x1000); // natural index 1

        adjust(&model, &mut subject).unwrap();

        let table = subject.abs32_labels();
        let id_2000 = table.id_by_address(0x2000).unwrap();
        let id_1000 = table.id_by_address(0x1000).unwrap();
        assert_eq!(table.get(id_1000).unwrap().index, 0);
        assert_eq!(table.get(id_2000).unwrap().index, 1);
    }

    /// Labels with no counterpart in the model keep a valid dense assignment.
    #[test]
    fn unmatched_labels_fill_free_slots() {
        let mut model = AssemblyProgram::new(0x40_0000);
        model.emit_rel32(0x9000);

        let mut subject = AssemblyProgram::new(0x40_0000);
        subject.emit_rel32(0x1111);
        subject.emit_rel32(0x2222);
        subject.emit_rel32(0x9000);

        adjust(&model, &mut subject).unwrap();

        let table = subject.rel32_labels();
        let mut indices: Vec<u32> = table.iter().map(|l| l.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2], "indices must stay a permutation");
        let matched = table.id_by_address(0x9000).unwrap();
        assert_eq!(table.get(matched).unwrap().index, 0, "matched label adopts model index");
    }

    /// Shifted reference sequences still unify via the lock-step pass when
    /// addresses moved between builds.
    #[test]
    fn lock_step_matches_moved_addresses() {
        let mut model = AssemblyProgram::new(0x40_0000);
        model.emit_rel32(0x1000);
        model.emit_rel32(0x2000);

        // Same structure, every target nudged by 0x10: no address matches.
        let mut subject = AssemblyProgram::new(0x40_0000);
        subject.emit_rel32(0x1010);
        subject.emit_rel32(0x2010);

        adjust(&model, &mut subject).unwrap();

        let table = subject.rel32_labels();
        let id_a = table.id_by_address(0x1010).unwrap();
        let id_b = table.id_by_address(0x2010).unwrap();
        assert_eq!(table.get(id_a).unwrap().index, 0);
        assert_eq!(table.get(id_b).unwrap().index, 1);
    }
}
