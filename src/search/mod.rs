pub mod bm25;
pub mod vector;
