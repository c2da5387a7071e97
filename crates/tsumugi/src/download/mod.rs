mod parallel;

pub use parallel::*;
