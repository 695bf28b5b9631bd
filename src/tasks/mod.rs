pub mod recompute;
