use super::gnn::node_search_space;
use crate::nn::{GnnNode, GnnNodeConfig, GnnType, GraphPooling, NormType};
use crate::search::{ParameterSpec, SearchSpace};
use crate::training::{masked_loss, LossCriterion};
use candle_core::{Result, Tensor, D};
use candle_nn::VarBuilder;
use molgraph_core::GraphBatch;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::IntoEnumIterator;
use validator::Validate;

/// Rejection sampling gives up after this many draws per requested negative.
const MAX_DRAWS_PER_NEGATIVE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EdgePredParams {
    #[validate(range(min = 1))]
    pub num_layer: usize,
    #[validate(range(min = 1))]
    pub hidden_size: usize,
    pub gnn_type: GnnType,
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub drop_ratio: f64,
    pub norm_layer: NormType,
    pub graph_pooling: GraphPooling,
}

impl Default for EdgePredParams {
    fn default() -> Self {
        Self {
            num_layer: 5,
            hidden_size: 300,
            gnn_type: GnnType::GinVirtual,
            drop_ratio: 0.5,
            norm_layer: NormType::BatchNorm,
            graph_pooling: GraphPooling::Max,
        }
    }
}

/// Self-supervised edge prediction: node embeddings are trained so that the
/// dot product of bonded atoms is high and that of random non-bonded pairs low.
#[derive(Debug, Clone)]
pub struct EdgePred {
    gnn_node: GnnNode,
    pooling: GraphPooling,
}

impl EdgePred {
    pub const MODEL_NAME: &'static str = "EdgePredMolecularEncoder";

    pub fn load(vb: VarBuilder, params: &EdgePredParams) -> Result<Self> {
        let config = GnnNodeConfig {
            num_layer: params.num_layer,
            emb_dim: params.hidden_size,
            gnn_type: params.gnn_type,
            drop_ratio: params.drop_ratio,
            norm_layer: params.norm_layer,
        };
        Ok(Self {
            gnn_node: GnnNode::load(vb.pp("gnn_node"), &config)?,
            pooling: params.graph_pooling,
        })
    }

    pub fn node_embeddings(&self, batch: &GraphBatch, train: bool) -> Result<Tensor> {
        self.gnn_node.forward_t(batch, train)
    }

    /// `[num_graphs, hidden_size]` molecule embeddings.
    pub fn embed(&self, batch: &GraphBatch) -> Result<Tensor> {
        let h_node = self.node_embeddings(batch, false)?;
        self.pooling.pool(&h_node, batch)
    }

    /// Binary cross entropy of bond scores against sampled non-bonds.
    /// `None` when the batch has no bonds to learn from.
    pub fn loss(
        &self,
        batch: &GraphBatch,
        rng: &mut StdRng,
        train: bool,
    ) -> Result<Option<Tensor>> {
        if batch.num_edges() == 0 {
            return Ok(None);
        }
        let edge_index = batch.edge_index.to_vec2::<u32>()?;
        // both directions of a bond are stored next to each other
        let pos_src: Vec<u32> = edge_index[0].iter().step_by(2).copied().collect();
        let pos_dst: Vec<u32> = edge_index[1].iter().step_by(2).copied().collect();
        let existing: HashSet<(u32, u32)> = edge_index[0]
            .iter()
            .copied()
            .zip(edge_index[1].iter().copied())
            .collect();
        let (neg_src, neg_dst) =
            sample_negative_edges(batch.num_nodes(), pos_src.len(), &existing, rng);

        let device = batch.x.device();
        let h = self.node_embeddings(batch, train)?;
        let score = |src: Vec<u32>, dst: Vec<u32>| -> Result<Tensor> {
            let n = src.len();
            let src = Tensor::from_vec(src, n, device)?;
            let dst = Tensor::from_vec(dst, n, device)?;
            h.index_select(&src, 0)?
                .mul(&h.index_select(&dst, 0)?)?
                .sum(D::Minus1)
        };
        let num_pos = pos_src.len();
        let num_neg = neg_src.len();
        let mut logits = vec![score(pos_src, pos_dst)?];
        if num_neg > 0 {
            logits.push(score(neg_src, neg_dst)?);
        }
        let logits = Tensor::cat(&logits, 0)?;

        let mut target = vec![1f32; num_pos];
        target.extend(std::iter::repeat(0f32).take(num_neg));
        let target = Tensor::from_vec(target, num_pos + num_neg, device)?;
        let mask = target.ones_like()?;
        masked_loss(LossCriterion::BceWithLogits, &logits, &target, &mask).map(Some)
    }

    pub fn search_space() -> SearchSpace {
        let mut space = node_search_space();
        if let Some(spec) = space.remove("emb_dim") {
            space.insert("hidden_size".into(), spec);
        }
        space.insert(
            "graph_pooling".into(),
            ParameterSpec::categorical(GraphPooling::iter().map(|p| p.to_string())),
        );
        space
    }
}

/// Uniformly drawn node pairs that are neither self loops nor existing edges.
/// May return fewer than `count` pairs for tiny, dense batches.
fn sample_negative_edges(
    num_nodes: usize,
    count: usize,
    existing: &HashSet<(u32, u32)>,
    rng: &mut StdRng,
) -> (Vec<u32>, Vec<u32>) {
    let mut src = Vec::with_capacity(count);
    let mut dst = Vec::with_capacity(count);
    if num_nodes < 2 {
        return (src, dst);
    }
    let mut draws = 0;
    while src.len() < count && draws < count * MAX_DRAWS_PER_NEGATIVE {
        draws += 1;
        let u = rng.gen_range(0..num_nodes as u32);
        let v = rng.gen_range(0..num_nodes as u32);
        if u != v && !existing.contains(&(u, v)) {
            src.push(u);
            dst.push(v);
        }
    }
    (src, dst)
}
