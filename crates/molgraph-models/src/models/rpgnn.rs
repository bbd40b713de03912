use super::gnn::node_search_space;
use super::Architecture;
use crate::nn::{global_add_pool, GnnNode, GnnNodeConfig, GnnType, NormType};
use crate::search::{ParameterSpec, SearchSpace};
use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use molgraph_core::GraphBatch;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use validator::Validate;

const PERMUTATION_SEED: u64 = 42;

/// Relational pooling hyperparameters. Readout is always a sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RpgnnParams {
    #[validate(range(min = 1))]
    pub num_layer: usize,
    #[validate(range(min = 1))]
    pub emb_dim: usize,
    pub gnn_type: GnnType,
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub drop_ratio: f64,
    pub norm_layer: NormType,
    /// Permutations averaged at inference time.
    #[validate(range(min = 1))]
    pub num_perm: usize,
    /// Width of the one-hot position code; positions wrap around it.
    #[validate(range(min = 1))]
    pub fixed_size: usize,
    #[validate(range(min = 9, max = 9))]
    pub num_node_feature: usize,
}

impl Default for RpgnnParams {
    fn default() -> Self {
        Self {
            num_layer: 5,
            emb_dim: 300,
            gnn_type: GnnType::GinVirtual,
            drop_ratio: 0.5,
            norm_layer: NormType::BatchNorm,
            num_perm: 3,
            fixed_size: 10,
            num_node_feature: 9,
        }
    }
}

impl RpgnnParams {
    fn node_config(&self) -> GnnNodeConfig {
        GnnNodeConfig {
            num_layer: self.num_layer,
            emb_dim: self.emb_dim,
            gnn_type: self.gnn_type,
            drop_ratio: self.drop_ratio,
            norm_layer: self.norm_layer,
        }
    }
}

/// Relational pooling GNN (Murphy et al., 2019).
///
/// Every node gets a one-hot code of its position in a random permutation of
/// its graph. Training samples one permutation per batch; inference averages
/// `num_perm` permutations drawn from a fixed seed.
#[derive(Debug)]
pub struct Rpgnn {
    input_linear: Linear,
    gnn_node: GnnNode,
    graph_pred_linear: Linear,
    num_perm: usize,
    fixed_size: usize,
    num_node_feature: usize,
    rng: Mutex<StdRng>,
}

impl Rpgnn {
    /// `[num_nodes]` u32 permutation positions, modulo `fixed_size`.
    fn permutation_ids(&self, batch: &GraphBatch, rng: &mut StdRng) -> Result<Tensor> {
        let mut ids = Vec::with_capacity(batch.num_nodes());
        for &count in &batch.node_counts {
            let mut perm: Vec<u32> = (0..count as u32).collect();
            perm.shuffle(rng);
            ids.extend(perm.into_iter().map(|p| p % self.fixed_size as u32));
        }
        Tensor::from_vec(ids, batch.num_nodes(), batch.x.device())
    }

    fn forward_with_ids(&self, batch: &GraphBatch, ids: &Tensor, train: bool) -> Result<Tensor> {
        let features = batch.x.dim(1)?;
        if features != self.num_node_feature {
            candle_core::bail!(
                "expected {} node features, got {features}",
                self.num_node_feature
            );
        }
        let device = batch.x.device();
        let one_hot = Tensor::eye(self.fixed_size, DType::F32, device)?.index_select(ids, 0)?;
        let input = Tensor::cat(&[batch.x.to_dtype(DType::F32)?, one_hot], 1)?;
        let h0 = self.input_linear.forward(&input)?;
        let h_node = self.gnn_node.forward_embeddings(h0, batch, train)?;
        let h_graph = global_add_pool(&h_node, batch)?;
        self.graph_pred_linear.forward(&h_graph)
    }

    fn lock_rng(&self) -> Result<std::sync::MutexGuard<'_, StdRng>> {
        self.rng
            .lock()
            .map_err(|_| candle_core::Error::Msg("permutation rng lock poisoned".into()))
    }
}

impl Architecture for Rpgnn {
    type Params = RpgnnParams;
    const MODEL_NAME: &'static str = "RPGNNMolecularPredictor";

    fn load(vb: VarBuilder, params: &RpgnnParams, num_tasks: usize, seed: u64) -> Result<Self> {
        let input_linear = linear(
            params.num_node_feature + params.fixed_size,
            params.emb_dim,
            vb.pp("input_linear"),
        )?;
        let gnn_node = GnnNode::load_without_encoder(vb.pp("gnn_node"), &params.node_config())?;
        let graph_pred_linear = linear(params.emb_dim, num_tasks, vb.pp("graph_pred_linear"))?;
        Ok(Self {
            input_linear,
            gnn_node,
            graph_pred_linear,
            num_perm: params.num_perm,
            fixed_size: params.fixed_size,
            num_node_feature: params.num_node_feature,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    fn forward_t(&self, batch: &GraphBatch, train: bool) -> Result<Tensor> {
        let ids = {
            let mut rng = self.lock_rng()?;
            self.permutation_ids(batch, &mut rng)?
        };
        self.forward_with_ids(batch, &ids, train)
    }

    fn predict(&self, batch: &GraphBatch) -> Result<Tensor> {
        let mut rng = StdRng::seed_from_u64(PERMUTATION_SEED);
        let mut total: Option<Tensor> = None;
        for _ in 0..self.num_perm {
            let ids = self.permutation_ids(batch, &mut rng)?;
            let logits = self.forward_with_ids(batch, &ids, false)?;
            total = Some(match total {
                Some(acc) => acc.add(&logits)?,
                None => logits,
            });
        }
        match total {
            Some(total) => total / self.num_perm as f64,
            None => candle_core::bail!("at least one permutation is required"),
        }
    }

    fn search_space() -> SearchSpace {
        let mut space = node_search_space();
        space.insert("num_perm".into(), ParameterSpec::integer(1, 10));
        space.insert("fixed_size".into(), ParameterSpec::integer(1, 10));
        space
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;
    use molgraph_core::graph_from_smiles;

    fn batch() -> GraphBatch {
        let graphs = [
            graph_from_smiles("CC(=O)O", None).unwrap(),
            graph_from_smiles("c1ccncc1", None).unwrap(),
        ];
        let refs: Vec<_> = graphs.iter().collect();
        GraphBatch::collate(&refs, &Device::Cpu).unwrap()
    }

    fn model(params: &RpgnnParams) -> Rpgnn {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Rpgnn::load(vb, params, 2, 42).unwrap()
    }

    fn training_ids(model: &Rpgnn, batch: &GraphBatch, passes: usize) -> Vec<Vec<u32>> {
        (0..passes)
            .map(|_| {
                let mut rng = model.lock_rng().unwrap();
                model
                    .permutation_ids(batch, &mut rng)
                    .unwrap()
                    .to_vec1::<u32>()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_position_codes_wrap() -> Result<()> {
        let params = RpgnnParams {
            num_layer: 1,
            emb_dim: 8,
            fixed_size: 3,
            ..Default::default()
        };
        let model = model(&params);
        let batch = batch();
        let mut rng = StdRng::seed_from_u64(0);
        let ids = model.permutation_ids(&batch, &mut rng)?.to_vec1::<u32>()?;
        assert_eq!(ids.len(), batch.num_nodes());
        assert!(ids.iter().all(|&id| id < 3));
        Ok(())
    }

    #[test]
    fn test_predict_is_deterministic() -> Result<()> {
        let params = RpgnnParams {
            num_layer: 2,
            emb_dim: 8,
            ..Default::default()
        };
        let model = model(&params);
        let batch = batch();
        let a = model.predict(&batch)?.to_vec2::<f32>()?;
        let b = model.predict(&batch)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        assert_eq!(model.forward_t(&batch, true)?.dims(), &[2, 2]);
        Ok(())
    }

    #[test]
    fn test_training_permutations_follow_seed() {
        let params = RpgnnParams {
            num_layer: 1,
            emb_dim: 8,
            ..Default::default()
        };
        let batch = batch();
        let a = training_ids(&model(&params), &batch, 5);
        let b = training_ids(&model(&params), &batch, 5);
        assert_eq!(a, b);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let other = Rpgnn::load(vb, &params, 2, 7).unwrap();
        assert_ne!(a, training_ids(&other, &batch, 5));
    }

    #[test]
    fn test_params_validation() {
        assert!(RpgnnParams::default().validate().is_ok());
        let bad = RpgnnParams {
            num_node_feature: 7,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let space = Rpgnn::search_space();
        assert!(space.contains_key("num_perm"));
        assert!(!space.contains_key("graph_pooling"));
    }
}
