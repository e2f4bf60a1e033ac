pub mod items;
pub mod names;
pub mod namespace;
pub mod token;
pub mod vocab;

pub use items::ItemType;
pub use namespace::Namespace;
pub use token::Token;
pub use vocab::Vocab;
