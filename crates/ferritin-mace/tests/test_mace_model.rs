use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use ferritin_mace::harmonics::rotate_positions;
use ferritin_mace::{
    build_graph, find_isolated_nodes, AtomicGraph, GraphBatch, GraphParams, MaceConfig, MaceError,
    MaceModel, Pooling,
};

fn small_config() -> MaceConfig {
    MaceConfig {
        r_max: 6.0,
        num_bessel: 4,
        max_ell: 2,
        correlation: 2,
        num_layers: 2,
        emb_dim: 4,
        mlp_dim: 8,
        encoder_dim: 6,
        ..Default::default()
    }
}

fn positions(offset: f32) -> Vec<[f32; 3]> {
    vec![
        [offset, 0.0, 0.0],
        [offset + 1.1, 0.4, -0.3],
        [offset - 0.6, 1.3, 0.5],
        [offset + 0.3, -1.2, 1.1],
        [offset - 1.0, -0.5, -1.2],
    ]
}

fn fully_connected(n: u32) -> Vec<[u32; 2]> {
    (0..n)
        .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| [j, i]))
        .collect()
}

fn batch(graphs: usize, device: &Device) -> Result<GraphBatch> {
    let graphs = (0..graphs)
        .map(|g| AtomicGraph::new(vec![0; 5], positions(g as f32 * 0.5), fully_connected(5)))
        .collect::<ferritin_mace::Result<Vec<_>>>()?;
    Ok(GraphBatch::from_graphs(&graphs, device)?)
}

fn rotation() -> [[f64; 3]; 3] {
    let (s, c) = (0.6f64, 0.8f64);
    // rotation about z followed by one about x
    let rz = [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]];
    let rx = [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]];
    let mut r = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            r[i][j] = (0..3).map(|k| rx[i][k] * rz[k][j]).sum();
        }
    }
    r
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
}

#[test]
fn test_encoder_output_shape() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MaceModel::load(vb, &small_config())?;
    assert_eq!(model.hidden_irreps().to_string(), "4x0e+4x1o+4x2e");
    assert_eq!(model.convs().len(), 2);
    assert_eq!(model.output_dim(), 6);

    let out = model.forward_t(&batch(2, &device)?, false)?;
    assert_eq!(out.dims(), &[2, 5, 6]);

    let h = model.node_features(&batch(1, &device)?, false)?;
    assert_eq!(h.dims(), &[5, model.hidden_irreps().dim()]);
    Ok(())
}

#[test]
fn test_hidden_narrower_than_embedding_without_residual() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = MaceConfig {
        residual: false,
        emb_dim: 16,
        hidden_irreps: Some("2x0e+2x1o".parse()?),
        ..small_config()
    };
    let model = MaceModel::load(vb, &config)?;

    let h = model.node_features(&batch(1, &device)?, false)?;
    assert_eq!(h.dims(), &[5, 8]);
    let out = model.forward_t(&batch(1, &device)?, false)?;
    assert_eq!(out.dims(), &[1, 5, 6]);
    assert!(out.flatten_all()?.to_vec1::<f32>()?.iter().all(|v| v.is_finite()));

    let residual = MaceConfig { residual: true, ..config };
    assert!(matches!(residual.validate(), Err(MaceError::Config(_))));
    Ok(())
}

#[test]
fn test_encoder_output_is_invariant() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MaceModel::load(vb, &small_config())?;
    let graphs = batch(1, &device)?;
    let out = model.forward_t(&graphs, false)?;

    let rotated = graphs.with_positions(rotate_positions(&graphs.positions, &rotation())?);
    let shift = Tensor::new(&[[2.0f32, -1.0, 4.0]], &device)?;
    let moved = rotated.with_positions(rotated.positions.broadcast_add(&shift)?);
    let out_moved = model.forward_t(&moved, false)?;

    let scale = out.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?.max(1.0);
    assert!(max_abs_diff(&out, &out_moved)? < 1e-3 * scale);
    Ok(())
}

#[test]
fn test_invariant_prediction_head() -> Result<()> {
    let device = Device::Cpu;
    for pool in [Pooling::Sum, Pooling::Mean] {
        let config = MaceConfig {
            as_encoder: false,
            equivariant_pred: false,
            out_dim: 3,
            pool,
            ..small_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = MaceModel::load(vb, &config)?;
        let graphs = batch(3, &device)?;
        let out = model.forward_t(&graphs, false)?;
        assert_eq!(out.dims(), &[3, 3]);

        let rotated = graphs.with_positions(rotate_positions(&graphs.positions, &rotation())?);
        let out_rot = model.forward_t(&rotated, false)?;
        let scale = out.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?.max(1.0);
        assert!(max_abs_diff(&out, &out_rot)? < 1e-3 * scale);
    }
    Ok(())
}

#[test]
fn test_equivariant_prediction_head_shape() -> Result<()> {
    let device = Device::Cpu;
    let config = MaceConfig {
        as_encoder: false,
        equivariant_pred: true,
        out_dim: 2,
        ..small_config()
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MaceModel::load(vb, &config)?;
    let out = model.forward_t(&batch(2, &device)?, true)?;
    assert_eq!(out.dims(), &[2, 2]);
    Ok(())
}

#[test]
fn test_fatal_graph_conditions() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MaceModel::load(vb, &small_config())?;

    // a node without edges never reaches the model
    let err = AtomicGraph::new(vec![0; 3], positions(0.0)[..3].to_vec(), vec![[0, 1], [1, 0]])
        .unwrap_err();
    assert!(matches!(err, MaceError::IsolatedNodes(ref nodes) if nodes == &vec![2]));

    // coincident atoms have no edge direction
    let mut pos = positions(0.0);
    pos[1] = pos[0];
    let g = AtomicGraph::new(vec![0; 5], pos, fully_connected(5))?;
    let err = model
        .forward_t(&GraphBatch::from_graphs(&[g], &device)?, false)
        .unwrap_err();
    assert!(matches!(err, MaceError::DegenerateEdge(_)));

    // encoder output requires equally sized graphs
    let a = AtomicGraph::new(vec![0; 5], positions(0.0), fully_connected(5))?;
    let b = AtomicGraph::new(vec![0; 4], positions(0.0)[..4].to_vec(), fully_connected(4))?;
    let err = model
        .forward_t(&GraphBatch::from_graphs(&[a, b], &device)?, false)
        .unwrap_err();
    assert!(matches!(err, MaceError::Config(_)));
    Ok(())
}

#[test]
fn test_residue_graph_feeds_the_model() -> Result<()> {
    let device = Device::Cpu;
    let n = 16;
    let ca: Vec<[f32; 3]> = (0..n)
        .map(|i| {
            let t = i as f32 * 1.7;
            [2.3 * t.cos(), 2.3 * t.sin(), 1.5 * i as f32]
        })
        .collect();
    let residues: Vec<i64> = (0..n as i64).collect();
    let params = GraphParams {
        max_edges: n * n,
        ..Default::default()
    };
    let edges = build_graph(&ca, &residues, &params);
    assert!(find_isolated_nodes(n, &edges).is_empty());
    assert!(edges
        .iter()
        .all(|e| (e[0] as i64 - e[1] as i64).abs() >= params.min_residue_distance));

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MaceModel::load(vb, &small_config())?;
    let graph = AtomicGraph::new(vec![0; n], ca, edges)?;
    let out = model.forward_t(&GraphBatch::from_graphs(&[graph], &device)?, false)?;
    assert_eq!(out.dims(), &[1, n, 6]);
    Ok(())
}
