mod readings_queries;

pub use readings_queries::*;
