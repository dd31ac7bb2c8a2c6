//! Query, summary, export and digest views over optrack record sets.

mod digest;
mod export;
mod query;

pub use digest::{render_digest, DigestInput};
pub use export::{
    encode, export_table, render_json, render_table, render_tsv, sha256_hex, write_export,
    ExportArtifact, ExportFormat, Table, Tabular,
};
pub use query::{
    list, next_task, similar_records, sort_for_listing, summary, ListFilter, SimilarRecord,
    DEFAULT_SIMILARITY_THRESHOLD,
};

pub const CRATE_NAME: &str = "optrack-report";
