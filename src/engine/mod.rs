pub mod arrays;
pub mod builder;
pub mod engine;
pub mod necessity;
pub mod row;
pub mod snapshot;
pub mod stats;

pub use arrays::Proxies;
pub use builder::Builder;
pub use engine::Engine;
pub use necessity::NecessityCache;
pub use row::{PlayerMatchRow, TraitRow, UnitRow};
pub use stats::TokenStats;
