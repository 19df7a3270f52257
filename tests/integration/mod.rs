pub mod cached_parser_tests;
pub mod end_to_end_tests;
pub mod fallback_tests;
