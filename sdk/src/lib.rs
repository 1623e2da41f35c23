pub mod service;

pub use service::{
    IngestItemReport, KnowledgeService, QueryResponse, ServiceError, ServiceWarmer,
};
