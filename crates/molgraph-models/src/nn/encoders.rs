use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{Embedding, Init, VarBuilder};
use molgraph_core::{get_atom_feature_dims, get_bond_feature_dims};

/// Sum of one embedding table per categorical feature column.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    embeddings: Vec<Embedding>,
    emb_dim: usize,
}

impl FeatureEncoder {
    /// Xavier-uniform initialised tables, stored as `{i}.weight`.
    pub fn load(vb: VarBuilder, feature_dims: &[usize], emb_dim: usize) -> Result<Self> {
        let embeddings = feature_dims
            .iter()
            .enumerate()
            .map(|(i, &num_embeddings)| {
                let bound = (6.0 / (num_embeddings + emb_dim) as f64).sqrt();
                let weight = vb.pp(i).get_with_hints(
                    (num_embeddings, emb_dim),
                    "weight",
                    Init::Uniform {
                        lo: -bound,
                        up: bound,
                    },
                )?;
                Ok(Embedding::new(weight, emb_dim))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            embeddings,
            emb_dim,
        })
    }

    pub fn emb_dim(&self) -> usize {
        self.emb_dim
    }
}

impl Module for FeatureEncoder {
    /// `xs`: `[n, num_features]` u32 indices -> `[n, emb_dim]`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut out: Option<Tensor> = None;
        for (i, embedding) in self.embeddings.iter().enumerate() {
            let column = xs.i((.., i))?.contiguous()?;
            let embedded = embedding.forward(&column)?;
            out = Some(match out {
                Some(acc) => (acc + embedded)?,
                None => embedded,
            });
        }
        out.ok_or_else(|| candle_core::Error::Msg("feature encoder has no columns".into()))
    }
}

pub fn atom_encoder(emb_dim: usize, vb: VarBuilder) -> Result<FeatureEncoder> {
    FeatureEncoder::load(vb, &get_atom_feature_dims(), emb_dim)
}

pub fn bond_encoder(emb_dim: usize, vb: VarBuilder) -> Result<FeatureEncoder> {
    FeatureEncoder::load(vb, &get_bond_feature_dims(), emb_dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_atom_encoder_shapes() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = atom_encoder(16, vb.pp("atom_encoder"))?;
        let xs = Tensor::new(
            &[[5u32, 0, 1, 5, 3, 0, 2, 0, 0], [7, 0, 1, 5, 1, 0, 2, 0, 0]],
            &Device::Cpu,
        )?;
        let out = encoder.forward(&xs)?;
        assert_eq!(out.dims(), &[2, 16]);
        assert_eq!(varmap.all_vars().len(), 9);
        Ok(())
    }
}
