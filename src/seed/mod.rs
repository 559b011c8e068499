pub mod data;

pub use data::{demo_registry, load_demo_data};
