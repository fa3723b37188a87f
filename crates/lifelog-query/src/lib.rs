//! lifelog-query
//!
//! Query understanding: relative dates, entities, synonyms and intent
//! ([`QueryPreprocessor`]), query-type routing ([`QueryClassifier`]) and
//! multi-part splitting ([`QueryDecomposer`]). Everything here is a pure
//! function of the query text and the clock.

pub mod classifier;
pub mod decomposer;
pub mod entities;
pub mod preprocessor;
pub mod synonyms;
pub mod temporal;

pub use classifier::{ExtractedEntities, QueryClassification, QueryClassifier, QueryType};
pub use decomposer::{DecomposedQuery, QueryDecomposer, SubQuery, SubQueryContext, SubQueryType};
pub use entities::QueryEntities;
pub use preprocessor::{Intent, PreprocessedQuery, QueryPreprocessor};
pub use temporal::{DateRange, TemporalExpression, TemporalInfo};
