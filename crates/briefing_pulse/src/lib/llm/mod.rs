pub mod generator;
pub mod openai;
pub mod usage;
