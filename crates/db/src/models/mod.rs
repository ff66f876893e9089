pub mod observation;
pub mod prediction;
