// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Queue backends: the Redis broker for production and an in-process queue
//! for development and tests, behind the one domain port.

mod memory_queue;
mod redis_queue;

pub use memory_queue::{MemoryJobQueue, DEFAULT_HEARTBEAT_WINDOW};
pub use redis_queue::RedisJobQueue;

use std::sync::Arc;

use dproc_domain::{DprocError, JobQueue};
use tracing::info;

use super::config::{QueueBackend, Settings};

/// Builds the queue backend the settings select.
pub async fn create_job_queue(settings: &Settings) -> Result<Arc<dyn JobQueue>, DprocError> {
    match &settings.queue {
        QueueBackend::Memory => {
            info!("using in-process queue; jobs will not survive a restart");
            Ok(Arc::new(MemoryJobQueue::default()))
        }
        QueueBackend::Redis { url } => {
            let queue = RedisJobQueue::connect(url).await?;
            info!("connected to redis queue");
            Ok(Arc::new(queue))
        }
    }
}
