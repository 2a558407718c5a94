pub mod tsv_source;

pub use tsv_source::read_tsv;
