pub mod model;
pub mod screen;
