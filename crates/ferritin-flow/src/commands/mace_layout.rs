use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use ferritin_mace::{MaceConfig, MaceModel};
use std::path::PathBuf;

pub fn execute(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => MaceConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => MaceConfig::default(),
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = MaceModel::load(vb, &config)?;

    println!("hidden irreps: {}", model.hidden_irreps());
    println!("spherical harmonics: {}", config.sh_irreps());
    for (i, conv) in model.convs().iter().enumerate() {
        println!(
            "conv {i}: {} paths, {} edge weights, out {}",
            conv.num_paths(),
            conv.weight_numel(),
            conv.out_irreps()
        );
    }
    let params: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
    println!("output dim: {}", model.output_dim());
    println!("parameters: {params}");
    Ok(())
}
