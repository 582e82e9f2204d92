pub mod env;
pub mod graph;

pub use env::{EngineConfig, EnvConfig};
pub use graph::{
    load_graph_from_file, load_graph_from_str, load_graph_from_value, GraphDocument, NodeDocument,
};
