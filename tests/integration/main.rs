//! Integration tests for the CDR crawler

mod crawl_tests;
