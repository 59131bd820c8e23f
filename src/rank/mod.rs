pub mod boost;
pub mod fusion;
pub mod mmr;
pub mod rerank;
pub mod select;
