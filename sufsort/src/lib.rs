// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Suffix array construction and longest-match queries for byte strings.

mod suffix_array;

pub use suffix_array::{LongestMatch, SuffixArray};
