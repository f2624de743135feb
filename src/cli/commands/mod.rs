pub mod cancel;
pub mod config;
pub mod run;
pub mod status;
