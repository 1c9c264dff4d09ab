pub mod classifier;
pub mod collaborators;
pub mod decoder;
pub mod picker;
