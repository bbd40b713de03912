//! Molecule featurizer for graph neural networks
//!
//! Converts a parsed [`Molecule`](crate::Molecule) into integer node and edge
//! feature matrices plus a bidirectional edge list. Every feature column is an
//! index into a fixed vocabulary whose last slot is reserved for values that
//! fall outside the vocabulary:
//!
//! - atoms: atomic number, chirality, degree, formal charge, hydrogen count,
//!   radical electrons, hybridization, aromatic flag, ring flag
//! - bonds: bond type, stereo, conjugation flag
mod features;
mod graph;

pub use features::{get_atom_feature_dims, get_bond_feature_dims, ATOM_FEATURES, BOND_FEATURES};
pub use graph::{graph_from_smiles, GraphFeatures, MolGraph};
