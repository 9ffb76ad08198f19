pub mod apply;
pub mod graph;
