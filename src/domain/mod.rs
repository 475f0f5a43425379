pub mod models;
pub mod registry;
pub mod report;
pub mod settings;
