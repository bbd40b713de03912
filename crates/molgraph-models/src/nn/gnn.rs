use super::conv::GraphConv;
use super::encoders::{atom_encoder, FeatureEncoder};
use super::norm::NormLayer;
use super::pooling::global_add_pool;
use super::{GnnType, NormType};
use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, BatchNormConfig, Dropout, Init, Linear, VarBuilder};
use molgraph_core::GraphBatch;

/// Shape of a [`GnnNode`] stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnnNodeConfig {
    pub num_layer: usize,
    pub emb_dim: usize,
    pub gnn_type: GnnType,
    pub drop_ratio: f64,
    pub norm_layer: NormType,
}

/// Linear -> BatchNorm -> ReLU, twice.
#[derive(Debug, Clone)]
struct VirtualNodeMlp {
    lin1: Linear,
    bn1: BatchNorm,
    lin2: Linear,
    bn2: BatchNorm,
}

impl VirtualNodeMlp {
    fn load(vb: VarBuilder, emb_dim: usize) -> Result<Self> {
        Ok(Self {
            lin1: linear(emb_dim, 2 * emb_dim, vb.pp("0"))?,
            bn1: batch_norm(2 * emb_dim, BatchNormConfig::default(), vb.pp("1"))?,
            lin2: linear(2 * emb_dim, emb_dim, vb.pp("3"))?,
            bn2: batch_norm(emb_dim, BatchNormConfig::default(), vb.pp("4"))?,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.bn1.forward_t(&self.lin1.forward(xs)?, train)?.relu()?;
        self.bn2.forward_t(&self.lin2.forward(&xs)?, train)?.relu()
    }
}

#[derive(Debug, Clone)]
struct VirtualNode {
    embedding: Tensor,
    mlps: Vec<VirtualNodeMlp>,
}

/// Node-level GNN: atom encoder followed by `num_layer` rounds of
/// conv -> norm -> ReLU (all but the last) -> dropout.
///
/// The virtual-node variants add one extra node per graph that is connected to
/// every atom; its state is added to each node before a layer and refreshed
/// from the pooled node states after it.
#[derive(Debug, Clone)]
pub struct GnnNode {
    atom_encoder: Option<FeatureEncoder>,
    convs: Vec<GraphConv>,
    norms: Vec<NormLayer>,
    virtual_node: Option<VirtualNode>,
    dropout: Dropout,
    config: GnnNodeConfig,
}

impl GnnNode {
    pub fn load(vb: VarBuilder, config: &GnnNodeConfig) -> Result<Self> {
        Self::build(vb, config, true)
    }

    /// Stack without an atom encoder, for models that embed nodes themselves
    /// and call [`GnnNode::forward_embeddings`].
    pub fn load_without_encoder(vb: VarBuilder, config: &GnnNodeConfig) -> Result<Self> {
        Self::build(vb, config, false)
    }

    fn build(vb: VarBuilder, config: &GnnNodeConfig, with_encoder: bool) -> Result<Self> {
        if config.num_layer < 1 {
            candle_core::bail!("number of GNN layers must be at least 1");
        }
        let atom_encoder = if with_encoder {
            Some(atom_encoder(config.emb_dim, vb.pp("atom_encoder"))?)
        } else {
            None
        };
        let mut convs = Vec::with_capacity(config.num_layer);
        let mut norms = Vec::with_capacity(config.num_layer);
        for i in 0..config.num_layer {
            convs.push(GraphConv::load(
                vb.pp("convs").pp(i),
                config.gnn_type,
                config.emb_dim,
            )?);
            norms.push(NormLayer::load(
                vb.pp("norms").pp(i),
                config.norm_layer,
                config.emb_dim,
            )?);
        }
        let virtual_node = if config.gnn_type.is_virtual() {
            let embedding = vb.get_with_hints(
                (1, config.emb_dim),
                "virtualnode_embedding.weight",
                Init::Const(0.0),
            )?;
            let mlps = (0..config.num_layer.saturating_sub(1))
                .map(|i| VirtualNodeMlp::load(vb.pp("mlp_virtualnode_list").pp(i), config.emb_dim))
                .collect::<Result<Vec<_>>>()?;
            Some(VirtualNode { embedding, mlps })
        } else {
            None
        };
        Ok(Self {
            atom_encoder,
            convs,
            norms,
            virtual_node,
            dropout: Dropout::new(config.drop_ratio as f32),
            config: *config,
        })
    }

    pub fn config(&self) -> &GnnNodeConfig {
        &self.config
    }

    /// Node embeddings `[num_nodes, emb_dim]`.
    pub fn forward_t(&self, batch: &GraphBatch, train: bool) -> Result<Tensor> {
        let Some(encoder) = &self.atom_encoder else {
            candle_core::bail!("this GNN stack expects precomputed node embeddings");
        };
        let h0 = encoder.forward(&batch.x)?;
        self.forward_embeddings(h0, batch, train)
    }

    /// Run the message passing layers on precomputed input embeddings.
    pub fn forward_embeddings(
        &self,
        h0: Tensor,
        batch: &GraphBatch,
        train: bool,
    ) -> Result<Tensor> {
        let num_layer = self.convs.len();
        let mut h = h0;
        let mut vn_emb = match &self.virtual_node {
            Some(vn) => Some(
                vn.embedding
                    .broadcast_as((batch.num_graphs, self.config.emb_dim))?
                    .contiguous()?,
            ),
            None => None,
        };

        for layer in 0..num_layer {
            if let Some(vn) = &vn_emb {
                h = h.add(&vn.index_select(&batch.batch, 0)?)?;
            }
            let mut next =
                self.convs[layer].forward_t(&h, &batch.edge_index, &batch.edge_attr, train)?;
            next = self.norms[layer].forward_t(&next, batch, train)?;
            if layer + 1 < num_layer {
                next = next.relu()?;
            }
            next = self.dropout.forward_t(&next, train)?;

            if let (Some(virtual_node), Some(vn)) = (&self.virtual_node, &vn_emb) {
                if layer + 1 < num_layer {
                    let pooled = global_add_pool(&h, batch)?.add(vn)?;
                    let updated = virtual_node.mlps[layer].forward_t(&pooled, train)?;
                    vn_emb = Some(self.dropout.forward_t(&updated, train)?);
                }
            }
            h = next;
        }
        Ok(h)
    }
}
