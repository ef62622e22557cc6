//! Integration Tests
//!
//! This module aggregates the integration tests for the dproc core.

mod common;

#[path = "integration/executor_test.rs"]
mod executor_test;

#[path = "integration/lifecycle_test.rs"]
mod lifecycle_test;

#[path = "integration/queue_flow_test.rs"]
mod queue_flow_test;

#[path = "integration/redis_queue_test.rs"]
mod redis_queue_test;

#[path = "integration/worker_pool_test.rs"]
mod worker_pool_test;
