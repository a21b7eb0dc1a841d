pub mod inspect_checkpoint;
pub mod mace_layout;
