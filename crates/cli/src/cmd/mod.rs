pub mod name;
pub mod run;
