//! Integration tests for the context-switched remote invocation core

mod delegate_cache;
mod proxy_invoke;
