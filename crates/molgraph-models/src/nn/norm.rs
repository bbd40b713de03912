use super::pooling::{global_add_pool, node_counts_tensor};
use super::NormType;
use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{
    batch_norm, layer_norm, BatchNorm, BatchNormConfig, LayerNorm, LayerNormConfig, VarBuilder,
};
use molgraph_core::GraphBatch;

const EPS: f64 = 1e-5;

/// Per-layer normalisation of node embeddings.
#[derive(Debug, Clone)]
pub enum NormLayer {
    Batch(BatchNorm),
    Layer(LayerNorm),
    /// Per graph and per channel, over the nodes of that graph; no affine terms.
    Instance,
    /// Divide by the square root of the graph size.
    Size,
}

impl NormLayer {
    pub fn load(vb: VarBuilder, norm_type: NormType, emb_dim: usize) -> Result<Self> {
        Ok(match norm_type {
            NormType::BatchNorm => {
                Self::Batch(batch_norm(emb_dim, BatchNormConfig::default(), vb)?)
            }
            NormType::LayerNorm => {
                Self::Layer(layer_norm(emb_dim, LayerNormConfig::default(), vb)?)
            }
            NormType::InstanceNorm => Self::Instance,
            NormType::SizeNorm => Self::Size,
        })
    }

    pub fn forward_t(&self, h: &Tensor, batch: &GraphBatch, train: bool) -> Result<Tensor> {
        match self {
            Self::Batch(bn) => bn.forward_t(h, train),
            Self::Layer(ln) => ln.forward(h),
            Self::Instance => {
                let counts = node_counts_tensor(batch, h.device())?;
                let mean = global_add_pool(h, batch)?.broadcast_div(&counts)?;
                let centered = h.sub(&mean.index_select(&batch.batch, 0)?)?;
                let var = global_add_pool(&centered.sqr()?, batch)?.broadcast_div(&counts)?;
                let std = (var + EPS)?.sqrt()?;
                centered.div(&std.index_select(&batch.batch, 0)?)
            }
            Self::Size => {
                let inv_sqrt = node_counts_tensor(batch, h.device())?.powf(-0.5)?;
                h.broadcast_mul(&inv_sqrt.index_select(&batch.batch, 0)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use molgraph_core::graph_from_smiles;

    #[test]
    fn test_instance_and_size_norm() -> Result<()> {
        let graphs = [
            graph_from_smiles("CCO", None).unwrap(),
            graph_from_smiles("CCCC", None).unwrap(),
        ];
        let refs: Vec<_> = graphs.iter().collect();
        let batch = GraphBatch::collate(&refs, &Device::Cpu).unwrap();
        let h = Tensor::arange(0f32, 14.0, &Device::Cpu)?.reshape((7, 2))?;

        let normed = NormLayer::Instance.forward_t(&h, &batch, true)?;
        // each graph is centred per channel
        let first = normed.narrow(0, 0, 3)?.sum(0)?.to_vec1::<f32>()?;
        assert!(first.iter().all(|v| v.abs() < 1e-4));

        let sized = NormLayer::Size.forward_t(&h, &batch, true)?.to_vec2::<f32>()?;
        assert!((sized[3][0] - 6.0 / 2.0).abs() < 1e-5);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ln = NormLayer::load(vb, NormType::LayerNorm, 2)?;
        assert_eq!(ln.forward_t(&h, &batch, false)?.dims(), &[7, 2]);
        Ok(())
    }
}
