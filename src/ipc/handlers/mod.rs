pub mod core;
pub mod directory;
pub mod grades;
pub mod importer;
pub mod instances;
pub mod livetake;
pub mod sessions;
pub mod statuses;
pub mod take;
