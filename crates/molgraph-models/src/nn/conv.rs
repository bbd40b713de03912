use super::encoders::{bond_encoder, FeatureEncoder};
use super::GnnType;
use candle_core::{DType, IndexOp, Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, BatchNormConfig, Init, Linear, VarBuilder};

/// Sum over incoming edges of `relu(x_src + e)` at every target node,
/// optionally scaled per edge by `norm`.
fn propagate(
    x: &Tensor,
    edge_index: &Tensor,
    edge_emb: &Tensor,
    norm: Option<&Tensor>,
) -> Result<Tensor> {
    let (num_nodes, dim) = x.dims2()?;
    let aggregated = Tensor::zeros((num_nodes, dim), x.dtype(), x.device())?;
    if edge_index.dim(1)? == 0 {
        return Ok(aggregated);
    }
    let src = edge_index.i(0)?.contiguous()?;
    let dst = edge_index.i(1)?.contiguous()?;
    let messages = x.index_select(&src, 0)?.add(edge_emb)?.relu()?;
    let messages = match norm {
        Some(norm) => messages.broadcast_mul(&norm.unsqueeze(1)?)?,
        None => messages,
    };
    aggregated.index_add(&dst, &messages, 0)
}

fn embed_edges(encoder: &FeatureEncoder, edge_attr: &Tensor) -> Result<Option<Tensor>> {
    if edge_attr.dim(0)? == 0 {
        return Ok(None);
    }
    encoder.forward(edge_attr).map(Some)
}

/// Graph isomorphism layer with bond features:
/// `mlp((1 + eps) * x_i + sum_j relu(x_j + e_ji))`.
#[derive(Debug, Clone)]
pub struct GinConv {
    lin1: Linear,
    bn: BatchNorm,
    lin2: Linear,
    eps: Tensor,
    bond_encoder: FeatureEncoder,
}

impl GinConv {
    pub fn load(vb: VarBuilder, emb_dim: usize) -> Result<Self> {
        let lin1 = linear(emb_dim, 2 * emb_dim, vb.pp("mlp.0"))?;
        let bn = batch_norm(2 * emb_dim, BatchNormConfig::default(), vb.pp("mlp.1"))?;
        let lin2 = linear(2 * emb_dim, emb_dim, vb.pp("mlp.3"))?;
        let eps = vb.get_with_hints(1, "eps", Init::Const(0.0))?;
        let bond_encoder = bond_encoder(emb_dim, vb.pp("bond_encoder"))?;
        Ok(Self {
            lin1,
            bn,
            lin2,
            eps,
            bond_encoder,
        })
    }

    pub fn forward_t(
        &self,
        x: &Tensor,
        edge_index: &Tensor,
        edge_attr: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let aggregated = match embed_edges(&self.bond_encoder, edge_attr)? {
            Some(edge_emb) => propagate(x, edge_index, &edge_emb, None)?,
            None => x.zeros_like()?,
        };
        let h = x.broadcast_mul(&(&self.eps + 1.0)?)?.add(&aggregated)?;
        let h = self.lin1.forward(&h)?;
        let h = self.bn.forward_t(&h, train)?.relu()?;
        self.lin2.forward(&h)
    }
}

/// Graph convolution with bond features and symmetric degree normalisation.
#[derive(Debug, Clone)]
pub struct GcnConv {
    linear: Linear,
    root_emb: Tensor,
    bond_encoder: FeatureEncoder,
}

impl GcnConv {
    pub fn load(vb: VarBuilder, emb_dim: usize) -> Result<Self> {
        let linear = linear(emb_dim, emb_dim, vb.pp("linear"))?;
        let root_emb = vb.get_with_hints(
            (1, emb_dim),
            "root_emb.weight",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        let bond_encoder = bond_encoder(emb_dim, vb.pp("bond_encoder"))?;
        Ok(Self {
            linear,
            root_emb,
            bond_encoder,
        })
    }

    pub fn forward(&self, x: &Tensor, edge_index: &Tensor, edge_attr: &Tensor) -> Result<Tensor> {
        let x = self.linear.forward(x)?;
        let num_nodes = x.dim(0)?;
        let num_edges = edge_index.dim(1)?;

        // degree counted over source nodes, plus the self loop
        let mut deg = Tensor::ones(num_nodes, DType::F32, x.device())?;
        if num_edges > 0 {
            let src = edge_index.i(0)?.contiguous()?;
            let ones = Tensor::ones(num_edges, DType::F32, x.device())?;
            deg = deg.index_add(&src, &ones, 0)?;
        }

        let aggregated = match embed_edges(&self.bond_encoder, edge_attr)? {
            Some(edge_emb) => {
                let deg_inv_sqrt = deg.powf(-0.5)?;
                let src = edge_index.i(0)?.contiguous()?;
                let dst = edge_index.i(1)?.contiguous()?;
                let norm = deg_inv_sqrt
                    .index_select(&src, 0)?
                    .mul(&deg_inv_sqrt.index_select(&dst, 0)?)?;
                propagate(&x, edge_index, &edge_emb, Some(&norm))?
            }
            None => x.zeros_like()?,
        };
        let root = x.broadcast_add(&self.root_emb)?.relu()?;
        aggregated.add(&root.broadcast_div(&deg.unsqueeze(1)?)?)
    }
}

#[derive(Debug, Clone)]
pub enum GraphConv {
    Gin(GinConv),
    Gcn(GcnConv),
}

impl GraphConv {
    pub fn load(vb: VarBuilder, gnn_type: GnnType, emb_dim: usize) -> Result<Self> {
        match gnn_type {
            GnnType::Gin | GnnType::GinVirtual => Ok(Self::Gin(GinConv::load(vb, emb_dim)?)),
            GnnType::Gcn | GnnType::GcnVirtual => Ok(Self::Gcn(GcnConv::load(vb, emb_dim)?)),
        }
    }

    pub fn forward_t(
        &self,
        x: &Tensor,
        edge_index: &Tensor,
        edge_attr: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        match self {
            Self::Gin(conv) => conv.forward_t(x, edge_index, edge_attr, train),
            Self::Gcn(conv) => conv.forward(x, edge_index, edge_attr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;
    use molgraph_core::{graph_from_smiles, GraphBatch};

    fn batch() -> GraphBatch {
        let graphs = [
            graph_from_smiles("CC(=O)O", None).unwrap(),
            graph_from_smiles("[Na+]", None).unwrap(),
        ];
        let refs: Vec<_> = graphs.iter().collect();
        GraphBatch::collate(&refs, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_convs_keep_shape() -> Result<()> {
        let batch = batch();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let x = Tensor::randn(0f32, 1.0, (batch.num_nodes(), 8), &Device::Cpu)?;
        for (name, gnn_type) in [("gin", GnnType::Gin), ("gcn", GnnType::Gcn)] {
            let conv = GraphConv::load(vb.pp(name), gnn_type, 8)?;
            let out = conv.forward_t(&x, &batch.edge_index, &batch.edge_attr, true)?;
            assert_eq!(out.dims(), &[5, 8]);
        }
        Ok(())
    }

    #[test]
    fn test_edgeless_graph() -> Result<()> {
        let graphs = [graph_from_smiles("[Na+].[Cl-]", None).unwrap()];
        let refs: Vec<_> = graphs.iter().collect();
        let batch = GraphBatch::collate(&refs, &Device::Cpu).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = GcnConv::load(vb, 4)?;
        let x = Tensor::ones((2, 4), DType::F32, &Device::Cpu)?;
        let out = conv.forward(&x, &batch.edge_index, &batch.edge_attr)?;
        assert_eq!(out.dims(), &[2, 4]);
        Ok(())
    }
}
