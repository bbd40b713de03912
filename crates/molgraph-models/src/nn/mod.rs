//! Graph neural network layers operating on [`GraphBatch`](molgraph_core::GraphBatch)es.
//!
//! Message passing follows the OGB molecule conventions: edges run from
//! `edge_index[0]` (source) to `edge_index[1]` (target) and every bond is
//! present in both directions.
mod conv;
mod encoders;
mod gnn;
mod norm;
mod pooling;

pub use conv::{GcnConv, GinConv, GraphConv};
pub use encoders::{atom_encoder, bond_encoder, FeatureEncoder};
pub use gnn::{GnnNode, GnnNodeConfig};
pub use norm::NormLayer;
pub use pooling::{global_add_pool, global_max_pool, global_mean_pool, GraphPooling};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Message passing layer, optionally with a virtual node.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum GnnType {
    #[serde(rename = "gin")]
    #[strum(serialize = "gin")]
    Gin,
    #[serde(rename = "gcn")]
    #[strum(serialize = "gcn")]
    Gcn,
    #[default]
    #[serde(rename = "gin-virtual")]
    #[strum(serialize = "gin-virtual")]
    GinVirtual,
    #[serde(rename = "gcn-virtual")]
    #[strum(serialize = "gcn-virtual")]
    GcnVirtual,
}

impl GnnType {
    pub fn is_virtual(&self) -> bool {
        matches!(self, GnnType::GinVirtual | GnnType::GcnVirtual)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NormType {
    #[default]
    BatchNorm,
    LayerNorm,
    InstanceNorm,
    SizeNorm,
}
