//! lifelog-text
//!
//! In-memory lexical pattern index. Phrases (quoted text, capitalized names,
//! "word + number" pairs) are pulled out of the query and scored well above
//! independent tokens; proximity and co-occurrence add on top, and the final
//! score is length-normalized into `[0, 1)`.

pub mod index;
pub mod phrase;
pub mod search;

pub use index::{IndexStats, PatternIndex};
pub use search::{normalize_score, SearchOptions};
