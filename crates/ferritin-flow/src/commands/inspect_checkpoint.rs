use candle_core::Device;
use ferritin_flow::Checkpoint;
use std::collections::HashMap;
use std::path::PathBuf;

pub fn execute(checkpoint: PathBuf, esm_model_key: String) -> anyhow::Result<()> {
    let ckpt = Checkpoint::from_safetensors(&checkpoint, &Device::Cpu)?;
    match &ckpt.esm_model {
        Some(name) => println!("esm model: {name}"),
        None => println!("esm model: not recorded"),
    }
    let state = ckpt.remap(&esm_model_key, HashMap::new())?;
    let mut names: Vec<_> = state.iter().collect();
    names.sort_by(|a, b| a.0.cmp(b.0));
    for (name, tensor) in names {
        println!("{name}\t{:?}", tensor.dims());
    }
    Ok(())
}
