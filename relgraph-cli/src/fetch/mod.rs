//! Read path: eager fetching of relation trees

pub mod eager;

pub use eager::EagerFetcher;
