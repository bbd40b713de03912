use super::Architecture;
use crate::nn::{GnnNode, GnnNodeConfig, GnnType, GraphPooling, NormType};
use crate::search::{ParameterSpec, SearchSpace};
use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use molgraph_core::GraphBatch;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GnnParams {
    #[validate(range(min = 1))]
    pub num_layer: usize,
    #[validate(range(min = 1))]
    pub emb_dim: usize,
    pub gnn_type: GnnType,
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub drop_ratio: f64,
    pub norm_layer: NormType,
    pub graph_pooling: GraphPooling,
}

impl Default for GnnParams {
    fn default() -> Self {
        Self {
            num_layer: 5,
            emb_dim: 300,
            gnn_type: GnnType::GinVirtual,
            drop_ratio: 0.5,
            norm_layer: NormType::BatchNorm,
            graph_pooling: GraphPooling::Max,
        }
    }
}

impl GnnParams {
    pub fn node_config(&self) -> GnnNodeConfig {
        GnnNodeConfig {
            num_layer: self.num_layer,
            emb_dim: self.emb_dim,
            gnn_type: self.gnn_type,
            drop_ratio: self.drop_ratio,
            norm_layer: self.norm_layer,
        }
    }
}

/// Shared search dimensions of the message passing stack.
pub(crate) fn node_search_space() -> SearchSpace {
    let mut space = SearchSpace::new();
    space.insert(
        "gnn_type".into(),
        ParameterSpec::categorical(GnnType::iter().map(|t| t.to_string())),
    );
    space.insert(
        "norm_layer".into(),
        ParameterSpec::categorical(NormType::iter().map(|t| t.to_string())),
    );
    space.insert("num_layer".into(), ParameterSpec::integer(2, 8));
    space.insert("emb_dim".into(), ParameterSpec::integer(256, 512));
    space.insert("drop_ratio".into(), ParameterSpec::float(0.05, 0.5));
    space
}

/// Node GNN, graph readout and a linear head.
#[derive(Debug, Clone)]
pub struct Gnn {
    gnn_node: GnnNode,
    pooling: GraphPooling,
    graph_pred_linear: Linear,
}

impl Architecture for Gnn {
    type Params = GnnParams;
    const MODEL_NAME: &'static str = "GNNMolecularPredictor";

    fn load(vb: VarBuilder, params: &GnnParams, num_tasks: usize, _seed: u64) -> Result<Self> {
        let gnn_node = GnnNode::load(vb.pp("gnn_node"), &params.node_config())?;
        let graph_pred_linear = linear(params.emb_dim, num_tasks, vb.pp("graph_pred_linear"))?;
        Ok(Self {
            gnn_node,
            pooling: params.graph_pooling,
            graph_pred_linear,
        })
    }

    fn forward_t(&self, batch: &GraphBatch, train: bool) -> Result<Tensor> {
        let h_node = self.gnn_node.forward_t(batch, train)?;
        let h_graph = self.pooling.pool(&h_node, batch)?;
        self.graph_pred_linear.forward(&h_graph)
    }

    fn search_space() -> SearchSpace {
        let mut space = node_search_space();
        space.insert(
            "graph_pooling".into(),
            ParameterSpec::categorical(GraphPooling::iter().map(|p| p.to_string())),
        );
        space
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use molgraph_core::graph_from_smiles;

    #[test]
    fn test_params_serde_names() {
        let params = GnnParams::default();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["gnn_type"], "gin-virtual");
        assert_eq!(json["norm_layer"], "batch_norm");
        assert_eq!(json["graph_pooling"], "max");
        let bad = GnnParams {
            drop_ratio: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_gnn_logits_shape() -> Result<()> {
        let graphs = [
            graph_from_smiles("CCO", None).unwrap(),
            graph_from_smiles("c1ccccc1", None).unwrap(),
            graph_from_smiles("[Na+]", None).unwrap(),
        ];
        let refs: Vec<_> = graphs.iter().collect();
        let batch = GraphBatch::collate(&refs, &Device::Cpu).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let params = GnnParams {
            num_layer: 2,
            emb_dim: 16,
            ..Default::default()
        };
        let model = Gnn::load(vb, &params, 3, 0)?;
        assert_eq!(model.forward_t(&batch, true)?.dims(), &[3, 3]);
        assert_eq!(model.predict(&batch)?.dims(), &[3, 3]);
        Ok(())
    }
}
