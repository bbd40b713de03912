use super::features::{atom_to_feature_vector, bond_to_feature_vector, ATOM_FEATURES, BOND_FEATURES};
use crate::error::Result;
use crate::smiles::Molecule;
use candle_core::{Device, Tensor};
use ndarray::{Array2, ArrayView1};

/// Integer graph representation of one molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct MolGraph {
    /// `[num_nodes, 9]`
    pub node_feat: Array2<u32>,
    /// `[2, num_edges]`; every bond appears as `i -> j` followed by `j -> i`.
    pub edge_index: Array2<u32>,
    /// `[num_edges, 3]`
    pub edge_feat: Array2<u32>,
    /// `[1, num_tasks]` target row, NaN for missing labels.
    pub y: Option<Array2<f32>>,
}

impl MolGraph {
    pub fn num_nodes(&self) -> usize {
        self.node_feat.nrows()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.ncols()
    }

    pub fn with_targets(mut self, targets: ArrayView1<f32>) -> Self {
        let row = targets.to_owned().insert_axis(ndarray::Axis(0));
        self.y = Some(row);
        self
    }

    /// Node features, edge index and edge features as `u32` tensors.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let x = Tensor::from_iter(self.node_feat.iter().copied(), device)?
            .reshape((self.num_nodes(), ATOM_FEATURES))?;
        let edge_index = Tensor::from_iter(self.edge_index.iter().copied(), device)?
            .reshape((2, self.num_edges()))?;
        let edge_attr = Tensor::from_iter(self.edge_feat.iter().copied(), device)?
            .reshape((self.num_edges(), BOND_FEATURES))?;
        Ok((x, edge_index, edge_attr))
    }
}

/// Molecule -> graph conversion.
pub trait GraphFeatures {
    /// Node feature matrix `[num_atoms, 9]`.
    fn atom_features(&self) -> Array2<u32>;

    /// Edge list and edge features, both directions per bond.
    fn bond_features(&self) -> (Array2<u32>, Array2<u32>);

    fn to_graph(&self) -> MolGraph {
        let node_feat = self.atom_features();
        let (edge_index, edge_feat) = self.bond_features();
        MolGraph {
            node_feat,
            edge_index,
            edge_feat,
            y: None,
        }
    }
}

impl GraphFeatures for Molecule {
    fn atom_features(&self) -> Array2<u32> {
        let mut node_feat = Array2::<u32>::zeros((self.num_atoms(), ATOM_FEATURES));
        for (idx, atom) in self.atoms.iter().enumerate() {
            let features = atom_to_feature_vector(atom, self.degree(idx));
            for (col, value) in features.into_iter().enumerate() {
                node_feat[[idx, col]] = value;
            }
        }
        node_feat
    }

    fn bond_features(&self) -> (Array2<u32>, Array2<u32>) {
        let num_edges = 2 * self.num_bonds();
        let mut edge_index = Array2::<u32>::zeros((2, num_edges));
        let mut edge_feat = Array2::<u32>::zeros((num_edges, BOND_FEATURES));
        for (idx, bond) in self.bonds.iter().enumerate() {
            let features = bond_to_feature_vector(bond);
            let (fwd, rev) = (2 * idx, 2 * idx + 1);
            edge_index[[0, fwd]] = bond.begin as u32;
            edge_index[[1, fwd]] = bond.end as u32;
            edge_index[[0, rev]] = bond.end as u32;
            edge_index[[1, rev]] = bond.begin as u32;
            for (col, value) in features.into_iter().enumerate() {
                edge_feat[[fwd, col]] = value;
                edge_feat[[rev, col]] = value;
            }
        }
        (edge_index, edge_feat)
    }
}

/// Parse `smiles` and featurize it, attaching `properties` as the target row.
pub fn graph_from_smiles(smiles: &str, properties: Option<ArrayView1<f32>>) -> Result<MolGraph> {
    let mol = Molecule::from_smiles(smiles)?;
    let graph = mol.to_graph();
    Ok(match properties {
        Some(y) => graph.with_targets(y),
        None => graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ethanol_graph() {
        let graph = graph_from_smiles("CCO", None).unwrap();
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.num_edges(), 4);
        // carbon, unspecified, degree 1, neutral, 3 H, no radical, sp3, not aromatic, no ring
        assert_eq!(graph.node_feat.row(0).to_vec(), vec![5, 0, 1, 5, 3, 0, 2, 0, 0]);
        assert_eq!(graph.node_feat.row(2).to_vec(), vec![7, 0, 1, 5, 1, 0, 2, 0, 0]);
        assert_eq!(graph.edge_index.row(0).to_vec(), vec![0, 1, 1, 2]);
        assert_eq!(graph.edge_index.row(1).to_vec(), vec![1, 0, 2, 1]);
        assert!(graph.y.is_none());
    }

    #[test]
    fn test_aromatic_edges() {
        let graph = graph_from_smiles("c1ccccc1", None).unwrap();
        assert_eq!(graph.num_edges(), 12);
        for row in graph.edge_feat.rows() {
            assert_eq!(row.to_vec(), vec![3, 0, 1]);
        }
        for row in graph.node_feat.rows() {
            assert_eq!(row[7], 1);
            assert_eq!(row[8], 1);
        }
    }

    #[test]
    fn test_targets_and_tensors() {
        let y = array![1.0f32, f32::NAN];
        let graph = graph_from_smiles("[Na+].[Cl-]", Some(y.view())).unwrap();
        assert_eq!(graph.num_edges(), 0);
        let targets = graph.y.as_ref().unwrap();
        assert_eq!(targets.shape(), &[1, 2]);
        assert!(targets[[0, 1]].is_nan());

        let (x, edge_index, edge_attr) = graph.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(x.dims(), &[2, 9]);
        assert_eq!(edge_index.dims(), &[2, 0]);
        assert_eq!(edge_attr.dims(), &[0, 3]);
    }
}
