pub mod points;
pub mod ranking;

pub use points::{score_guesses, to_results};
pub use ranking::rank;
