pub mod doc_writer;
pub mod field_info;
pub mod freq_prox;
pub mod segment;
pub mod skip;
