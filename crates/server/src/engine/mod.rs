pub mod notebook;
pub mod registry;
