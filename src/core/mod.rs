pub mod job;
pub mod liability;
pub mod node;
pub mod result;
