pub mod audit;
pub mod token;
