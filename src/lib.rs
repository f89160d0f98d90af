//! Router code generator and storage-layout verifier.
//!
//! # Overview
//!
//! A protocol built from many independently compiled module contracts is
//! exposed through a single generated router that dispatches every call by
//! its four-byte selector. This crate produces that router and guards the
//! storage of the modules behind it across upgrades.
//!
//! Use [`router::generate_router`] to turn a set of [`types::ContractData`]
//! into router source code. Selectors are collected from every module ABI,
//! checked for collisions, arranged into a [`router::DispatchTree`] and
//! rendered through a [`router::RouterTemplate`].
//!
//! Use [`storage::extract_layouts`] to take a structural [`storage::StorageDump`]
//! of the compiled ASTs, then [`storage::compare_dumps`] against the dump of
//! the previous deployment. Any `error` mutation reported by the comparison
//! must block the deployment, see [`storage::ensure_compatible`].
//!
//! [`storage::find_slot_collisions`] statically checks that no two storage
//! namespaces are anchored at the same base slot.
//!
//! Inputs come from compiler artifacts, see [`artifact::load_artifacts`] and
//! the [`artifact::ArtifactCache`] keeping parsed files between runs.
//!
//! # Limitations/follow-ups
//!
//! * Slot values derived from arithmetic over hashes (the EIP-7201
//!   `keccak256(abi.encode(uint256(keccak256(id)) - 1))` form) are reported as
//!   unverifiable unless the pre-computed literal is used instead.
//!
//! * Storage extraction covers struct-based namespaces only, plain contract
//!   state variables are not part of the dump.
//!
//! # Testing
//!
//! [`testing`] module provides fixture builders for ABIs and compiler ASTs.

pub mod artifact;
pub mod ast;
pub mod error;
pub mod router;
pub mod storage;
pub mod testing;
pub mod types;
