//! Mini-batching of molecular graphs.
use crate::error::{MolError, Result};
use crate::featurize::{MolGraph, ATOM_FEATURES, BOND_FEATURES};
use candle_core::{Device, Tensor};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Disjoint union of several graphs, ready for a forward pass.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    /// `[num_nodes, 9]` u32 node features.
    pub x: Tensor,
    /// `[2, num_edges]` u32, offset into the concatenated node list.
    pub edge_index: Tensor,
    /// `[num_edges, 3]` u32 edge features.
    pub edge_attr: Tensor,
    /// `[num_nodes]` u32 graph id of every node.
    pub batch: Tensor,
    pub num_graphs: usize,
    /// Nodes per graph; graphs occupy contiguous node ranges.
    pub node_counts: Vec<usize>,
    /// `[num_graphs, num_tasks]` f32 targets with missing labels set to 0.
    pub y: Option<Tensor>,
    /// `[num_graphs, num_tasks]` f32, 1 where a label is present.
    pub mask: Option<Tensor>,
    /// Raw targets (NaN kept) for metric computation on the host.
    pub labels: Option<Array2<f32>>,
}

impl GraphBatch {
    pub fn collate(graphs: &[&MolGraph], device: &Device) -> Result<Self> {
        if graphs.is_empty() {
            return Err(MolError::Batch("cannot collate an empty batch".into()));
        }
        let num_nodes: usize = graphs.iter().map(|g| g.num_nodes()).sum();
        let num_edges: usize = graphs.iter().map(|g| g.num_edges()).sum();

        let mut x = Vec::with_capacity(num_nodes * ATOM_FEATURES);
        let mut src = Vec::with_capacity(num_edges);
        let mut dst = Vec::with_capacity(num_edges);
        let mut edge_attr = Vec::with_capacity(num_edges * BOND_FEATURES);
        let mut batch = Vec::with_capacity(num_nodes);
        let mut node_counts = Vec::with_capacity(graphs.len());

        let mut offset = 0u32;
        for (graph_idx, graph) in graphs.iter().enumerate() {
            x.extend(graph.node_feat.iter().copied());
            src.extend(graph.edge_index.row(0).iter().map(|&i| i + offset));
            dst.extend(graph.edge_index.row(1).iter().map(|&i| i + offset));
            edge_attr.extend(graph.edge_feat.iter().copied());
            batch.extend(std::iter::repeat(graph_idx as u32).take(graph.num_nodes()));
            node_counts.push(graph.num_nodes());
            offset += graph.num_nodes() as u32;
        }
        src.extend(dst);

        let labels = collate_labels(graphs)?;
        let (y, mask) = match &labels {
            Some(labels) => {
                let shape = (labels.nrows(), labels.ncols());
                let filled: Vec<f32> = labels
                    .iter()
                    .map(|v| if v.is_nan() { 0.0 } else { *v })
                    .collect();
                let mask: Vec<f32> = labels
                    .iter()
                    .map(|v| if v.is_nan() { 0.0 } else { 1.0 })
                    .collect();
                (
                    Some(Tensor::from_vec(filled, shape, device)?),
                    Some(Tensor::from_vec(mask, shape, device)?),
                )
            }
            None => (None, None),
        };

        Ok(Self {
            x: Tensor::from_vec(x, (num_nodes, ATOM_FEATURES), device)?,
            edge_index: Tensor::from_vec(src, (2, num_edges), device)?,
            edge_attr: Tensor::from_vec(edge_attr, (num_edges, BOND_FEATURES), device)?,
            batch: Tensor::from_vec(batch, num_nodes, device)?,
            num_graphs: graphs.len(),
            node_counts,
            y,
            mask,
            labels,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.node_counts.iter().sum()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.dims()[1]
    }
}

fn collate_labels(graphs: &[&MolGraph]) -> Result<Option<Array2<f32>>> {
    let with_targets = graphs.iter().filter(|g| g.y.is_some()).count();
    if with_targets == 0 {
        return Ok(None);
    }
    if with_targets != graphs.len() {
        return Err(MolError::Batch(
            "either all graphs in a batch carry targets or none do".into(),
        ));
    }
    let rows: Vec<_> = graphs
        .iter()
        .filter_map(|g| g.y.as_ref().map(|y| y.view()))
        .collect();
    ndarray::concatenate(ndarray::Axis(0), &rows)
        .map(Some)
        .map_err(|e| MolError::Batch(format!("inconsistent target widths: {e}")))
}

/// Fixed-size batches over a slice of graphs.
pub struct GraphLoader<'a> {
    graphs: &'a [MolGraph],
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl<'a> GraphLoader<'a> {
    pub fn new(graphs: &'a [MolGraph], batch_size: usize) -> Self {
        Self {
            graphs,
            batch_size: batch_size.max(1),
            shuffle: false,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Reshuffle the graph order at the start of every epoch.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        self.graphs.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// One pass over the data.
    pub fn epoch<'b>(
        &'b mut self,
        device: &'b Device,
    ) -> impl Iterator<Item = Result<GraphBatch>> + 'b {
        let mut order: Vec<usize> = (0..self.graphs.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let graphs: &'b [MolGraph] = self.graphs;
        let chunks: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        chunks.into_iter().map(move |chunk| {
            let members: Vec<&MolGraph> = chunk.iter().map(|&i| &graphs[i]).collect();
            GraphBatch::collate(&members, device)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::featurize::graph_from_smiles;
    use ndarray::array;

    fn graphs() -> Vec<MolGraph> {
        vec![
            graph_from_smiles("CCO", Some(array![1.0f32, f32::NAN].view())).unwrap(),
            graph_from_smiles("C", Some(array![0.0f32, 2.0].view())).unwrap(),
            graph_from_smiles("c1ccccc1", Some(array![1.0f32, 3.0].view())).unwrap(),
        ]
    }

    #[test]
    fn test_collate_offsets() {
        let graphs = graphs();
        let refs: Vec<&MolGraph> = graphs.iter().collect();
        let batch = GraphBatch::collate(&refs, &Device::Cpu).unwrap();
        assert_eq!(batch.num_graphs, 3);
        assert_eq!(batch.node_counts, vec![3, 1, 6]);
        assert_eq!(batch.x.dims(), &[10, 9]);
        assert_eq!(batch.edge_index.dims(), &[2, 16]);
        assert_eq!(batch.edge_attr.dims(), &[16, 3]);

        let edge_index = batch.edge_index.to_vec2::<u32>().unwrap();
        // first benzene edge is shifted past ethanol and methane
        assert_eq!(edge_index[0][4], 4);
        assert_eq!(edge_index[1][4], 5);
        assert_eq!(
            batch.batch.to_vec1::<u32>().unwrap(),
            vec![0, 0, 0, 1, 2, 2, 2, 2, 2, 2]
        );
    }

    #[test]
    fn test_collate_targets() {
        let graphs = graphs();
        let refs: Vec<&MolGraph> = graphs.iter().collect();
        let batch = GraphBatch::collate(&refs, &Device::Cpu).unwrap();
        let y = batch.y.unwrap().to_vec2::<f32>().unwrap();
        let mask = batch.mask.unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(y[0], vec![1.0, 0.0]);
        assert_eq!(mask[0], vec![1.0, 0.0]);
        assert_eq!(mask[1], vec![1.0, 1.0]);
        assert!(batch.labels.unwrap()[[0, 1]].is_nan());
    }

    #[test]
    fn test_loader_covers_all_graphs() {
        let graphs = graphs();
        let mut loader = GraphLoader::new(&graphs, 2).shuffled(7);
        assert_eq!(loader.len(), 2);
        for _ in 0..3 {
            let total: usize = loader
                .epoch(&Device::Cpu)
                .map(|b| b.unwrap().num_graphs)
                .sum();
            assert_eq!(total, 3);
        }
    }
}
