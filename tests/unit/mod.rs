pub mod config_tests;
pub mod models_tests;
pub mod parser_tests;
pub mod schematron_tests;
