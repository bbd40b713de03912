use candle_core::{Device, Result, Tensor};
use molgraph_core::GraphBatch;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Graph readout.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GraphPooling {
    Sum,
    Mean,
    #[default]
    Max,
}

impl GraphPooling {
    pub fn pool(&self, h: &Tensor, batch: &GraphBatch) -> Result<Tensor> {
        match self {
            GraphPooling::Sum => global_add_pool(h, batch),
            GraphPooling::Mean => global_mean_pool(h, batch),
            GraphPooling::Max => global_max_pool(h, batch),
        }
    }
}

/// `[num_graphs, 1]` f32 node counts.
pub(crate) fn node_counts_tensor(batch: &GraphBatch, device: &Device) -> Result<Tensor> {
    let counts: Vec<f32> = batch.node_counts.iter().map(|&n| n.max(1) as f32).collect();
    Tensor::from_vec(counts, (batch.num_graphs, 1), device)
}

/// `[num_nodes, d]` -> `[num_graphs, d]`
pub fn global_add_pool(h: &Tensor, batch: &GraphBatch) -> Result<Tensor> {
    let dim = h.dim(1)?;
    Tensor::zeros((batch.num_graphs, dim), h.dtype(), h.device())?.index_add(&batch.batch, h, 0)
}

pub fn global_mean_pool(h: &Tensor, batch: &GraphBatch) -> Result<Tensor> {
    let counts = node_counts_tensor(batch, h.device())?.to_dtype(h.dtype())?;
    global_add_pool(h, batch)?.broadcast_div(&counts)
}

/// Graphs occupy contiguous node ranges, so each is reduced from a narrow view.
pub fn global_max_pool(h: &Tensor, batch: &GraphBatch) -> Result<Tensor> {
    let dim = h.dim(1)?;
    let mut pooled = Vec::with_capacity(batch.num_graphs);
    let mut start = 0;
    for &count in &batch.node_counts {
        if count == 0 {
            pooled.push(Tensor::zeros((1, dim), h.dtype(), h.device())?);
        } else {
            pooled.push(h.narrow(0, start, count)?.max_keepdim(0)?);
        }
        start += count;
    }
    Tensor::cat(&pooled, 0)
}
