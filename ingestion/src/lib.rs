pub mod chunkers;
pub mod embedding_cache;
pub mod extract;
pub mod policy;
pub mod processor;
