//! molgraph-core
//!
//! Chemistry side of molgraph: SMILES parsing, graph featurization,
//! input validation, batching and evaluation metrics.
//!
//! ```
//! use molgraph_core::{graph_from_smiles, get_atom_feature_dims};
//! let graph = graph_from_smiles("CC(=O)O", None).unwrap();
//! assert_eq!(graph.node_feat.ncols(), get_atom_feature_dims().len());
//! ```
pub mod batch;
pub mod element;
pub mod error;
pub mod featurize;
pub mod metrics;
pub mod smiles;
pub mod validate;

pub use batch::{GraphBatch, GraphLoader};
pub use error::{MolError, Result, SmilesError};
pub use featurize::{
    get_atom_feature_dims, get_bond_feature_dims, graph_from_smiles, GraphFeatures, MolGraph,
};
pub use metrics::Metric;
pub use smiles::Molecule;
pub use validate::{inspect_task_types, validate_inputs, validate_smiles, Targets};
