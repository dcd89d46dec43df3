// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use exediff::EncodedProgram;

#[derive(Parser)]
#[command(about = "Delta patches for Win32 x86 executables")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Disassemble an executable into its serialized encoded form
    Dis { exe: PathBuf, out: PathBuf },
    /// Reassemble an executable from its serialized encoded form
    Asm { input: PathBuf, exe: PathBuf },
    /// Disassemble an executable with labels adjusted to a model executable
    Disadj {
        exe: PathBuf,
        model: PathBuf,
        out: PathBuf,
    },
    /// Generate an ensemble patch between two files
    Gen {
        old: PathBuf,
        new: PathBuf,
        patch: PathBuf,
    },
    /// Apply an ensemble patch to reconstruct the new file
    Apply {
        old: PathBuf,
        patch: PathBuf,
        new: PathBuf,
    },
    /// Generate a raw bsdiff patch, bypassing the executable transform
    GenBsdiff {
        old: PathBuf,
        new: PathBuf,
        patch: PathBuf,
    },
    /// Apply a raw bsdiff patch
    ApplyBsdiff {
        old: PathBuf,
        patch: PathBuf,
        new: PathBuf,
    },
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    fs::write(path, bytes).with_context(|| format!("Failed to write '{}'", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Dis { exe, out } => {
            let program = exediff::parse_pe(&read(&exe)?)
                .with_context(|| format!("Failed to disassemble '{}'", exe.display()))?;
            let encoded = EncodedProgram::from_program(program)?;
            write(&out, &encoded.serialize()?)?;
        }
        Command::Asm { input, exe } => {
            let encoded = EncodedProgram::deserialize(&read(&input)?)
                .with_context(|| format!("Failed to decode '{}'", input.display()))?;
            write(&exe, &encoded.assemble()?)?;
        }
        Command::Disadj { exe, model, out } => {
            let model_program = exediff::parse_pe(&read(&model)?)
                .with_context(|| format!("Failed to disassemble model '{}'", model.display()))?;
            let mut program = exediff::parse_pe(&read(&exe)?)
                .with_context(|| format!("Failed to disassemble '{}'", exe.display()))?;
            exediff::adjust(&model_program, &mut program)?;
            let encoded = EncodedProgram::from_program(program)?;
            write(&out, &encoded.serialize()?)?;
        }
        Command::Gen { old, new, patch } => {
            let patch_bytes = exediff::generate_ensemble_patch(&read(&old)?, &read(&new)?)
                .context("Failed to generate patch")?;
            write(&patch, &patch_bytes)?;
        }
        Command::Apply { old, patch, new } => {
            let new_bytes = exediff::apply_ensemble_patch(&read(&old)?, &read(&patch)?)
                .context("Failed to apply patch")?;
            write(&new, &new_bytes)?;
        }
        Command::GenBsdiff { old, new, patch } => {
            let patch_bytes = exediff::create_binary_patch(&read(&old)?, &read(&new)?)
                .context("Failed to generate binary patch")?;
            write(&patch, &patch_bytes)?;
        }
        Command::ApplyBsdiff { old, patch, new } => {
            let new_bytes = exediff::apply_binary_patch(&read(&old)?, &read(&patch)?)
                .context("Failed to apply binary patch")?;
            write(&new, &new_bytes)?;
        }
    }

    Ok(())
}
