use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use ferritin_mace::harmonics::{rotate_features, rotate_positions};
use ferritin_mace::layers::{EquivariantProductBasisBlock, IrrepsReshape, TensorProductConvLayer};
use ferritin_mace::radial::edge_vectors_and_lengths;
use ferritin_mace::{Aggregation, AtomicGraph, GraphBatch, Irreps, RadialEmbeddingBlock, SphericalHarmonics};

fn rotation() -> [[f64; 3]; 3] {
    let q = [0.3f64, -0.5, 0.7, 0.2];
    let n = q.iter().map(|v| v * v).sum::<f64>().sqrt();
    let [w, x, y, z] = q.map(|v| v / n);
    [
        [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z), 2.0 * (x * z + w * y)],
        [2.0 * (x * y + w * z), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x)],
        [2.0 * (x * z - w * y), 2.0 * (y * z + w * x), 1.0 - 2.0 * (x * x + y * y)],
    ]
}

fn fully_connected(n: u32) -> Vec<[u32; 2]> {
    (0..n)
        .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| [j, i]))
        .collect()
}

fn graph(device: &Device) -> Result<GraphBatch> {
    let positions = vec![
        [0.0, 0.0, 0.0],
        [1.2, 0.3, -0.4],
        [-0.7, 1.5, 0.2],
        [0.4, -1.1, 1.3],
        [-1.3, -0.6, -0.9],
    ];
    let g = AtomicGraph::new(vec![0; 5], positions, fully_connected(5))?;
    Ok(GraphBatch::from_graphs(&[g], device)?)
}

fn assert_close(a: &Tensor, b: &Tensor) -> Result<()> {
    let a = a.flatten_all()?.to_vec1::<f32>()?;
    let b = b.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(a.len(), b.len());
    let scale = a.iter().fold(1f32, |m, v| m.max(v.abs()));
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() <= 1e-3 * scale, "{x} vs {y} (scale {scale})");
    }
    Ok(())
}

struct EdgeInputs {
    sh: Tensor,
    radial: Tensor,
}

fn edge_inputs(batch: &GraphBatch, lmax: usize) -> Result<EdgeInputs> {
    let (vectors, lengths) = edge_vectors_and_lengths(&batch.positions, &batch.edge_index)?;
    Ok(EdgeInputs {
        sh: SphericalHarmonics::new(lmax).forward(&vectors)?,
        radial: RadialEmbeddingBlock::new(5.0, 6, 5).forward(&lengths)?,
    })
}

#[test]
fn test_convolution_is_equivariant() -> Result<()> {
    let device = Device::Cpu;
    let r = rotation();
    let irreps: Irreps = "3x0e+3x1o+3x2e".parse()?;
    let sh_irreps = Irreps::spherical_harmonics(2);

    for (aggr, batch_norm) in [(Aggregation::Sum, false), (Aggregation::Mean, true)] {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = TensorProductConvLayer::load(vb, &irreps, &irreps, &sh_irreps, 6, 16, aggr, batch_norm)?;

        let batch = graph(&device)?;
        let h = Tensor::randn(0f32, 1f32, (5, irreps.dim()), &device)?;
        let edges = edge_inputs(&batch, 2)?;
        let out = conv.forward_t(&h, &batch.edge_index, &edges.sh, &edges.radial, true)?;
        assert_eq!(out.dims(), &[5, irreps.dim()]);

        let rotated = batch.with_positions(rotate_positions(&batch.positions, &r)?);
        let rotated_edges = edge_inputs(&rotated, 2)?;
        let h_rot = rotate_features(&irreps, &h, &r)?;
        let out_rot = conv.forward_t(
            &h_rot,
            &rotated.edge_index,
            &rotated_edges.sh,
            &rotated_edges.radial,
            true,
        )?;
        assert_close(&out_rot, &rotate_features(&irreps, &out, &r)?)?;
    }
    Ok(())
}

#[test]
fn test_convolution_is_translation_invariant() -> Result<()> {
    let device = Device::Cpu;
    let irreps: Irreps = "2x0e+2x1o".parse()?;
    let sh_irreps = Irreps::spherical_harmonics(1);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let conv = TensorProductConvLayer::load(vb, &irreps, &irreps, &sh_irreps, 6, 8, Aggregation::Sum, false)?;

    let batch = graph(&device)?;
    let shift = Tensor::new(&[[3.0f32, -2.0, 7.5]], &device)?;
    let moved = batch.with_positions(batch.positions.broadcast_add(&shift)?);
    let h = Tensor::randn(0f32, 1f32, (5, irreps.dim()), &device)?;

    let a = edge_inputs(&batch, 1)?;
    let b = edge_inputs(&moved, 1)?;
    let out = conv.forward_t(&h, &batch.edge_index, &a.sh, &a.radial, false)?;
    let out_moved = conv.forward_t(&h, &moved.edge_index, &b.sh, &b.radial, false)?;
    assert_close(&out, &out_moved)?;
    Ok(())
}

#[test]
fn test_product_block_is_equivariant() -> Result<()> {
    let device = Device::Cpu;
    let r = rotation();
    let irreps: Irreps = "4x0e+4x1o+4x2e".parse()?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let prod = EquivariantProductBasisBlock::load(vb, &irreps, &irreps, 3, true)?;
    let reshape = IrrepsReshape::new(&irreps)?;

    let x = Tensor::randn(0f32, 0.5f32, (7, irreps.dim()), &device)?;
    let sc = Tensor::randn(0f32, 1f32, (7, irreps.dim()), &device)?;
    let out = prod.forward(&reshape.forward(&x)?, Some(&sc))?;
    assert_eq!(out.dims(), &[7, irreps.dim()]);

    let x_rot = rotate_features(&irreps, &x, &r)?;
    let sc_rot = rotate_features(&irreps, &sc, &r)?;
    let out_rot = prod.forward(&reshape.forward(&x_rot)?, Some(&sc_rot))?;
    assert_close(&out_rot, &rotate_features(&irreps, &out, &r)?)?;
    Ok(())
}

#[test]
fn test_scalars_are_unchanged_by_rotation() -> Result<()> {
    let device = Device::Cpu;
    let r = rotation();
    let irreps: Irreps = "2x0e+2x1o".parse()?;
    let x = Tensor::randn(0f32, 1f32, (3, irreps.dim()), &device)?;
    let x_rot = rotate_features(&irreps, &x, &r)?;
    assert_close(&x.narrow(1, 0, 2)?, &x_rot.narrow(1, 0, 2)?)?;
    Ok(())
}
