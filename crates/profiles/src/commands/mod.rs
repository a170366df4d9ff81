pub mod check_coefs;
pub mod process;
pub mod resolve;
